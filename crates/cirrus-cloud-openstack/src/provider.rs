//! OpenStack connector

use crate::api::{DriverFactory, OpenStackApi};
use crate::auth::{NO_COMPATIBLE_AUTH, auth_params};
use crate::error::OpenStackError;
use async_trait::async_trait;
use cirrus_cloud::{
    CleanupReport, CloudConnector, CloudError, CloudSite, ConcreteSystem, Credential, DnsUpdater,
    DriverCache, HttpDynDns, ImageInfo, Infrastructure, InfrastructureSpec, QuotaReport, Result,
    RetryConfig, Sleeper, System, TokioSleeper, VirtualMachine, first_compatible, poll_until,
    retry_transient,
};
use cirrus_config::{PollingSettings, ProviderRetrySettings, Settings};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Provider type tag of the connector
pub const PROVIDER_TYPE: &str = "OpenStack";

/// Delays of the connector: state polling and transient error retries
#[derive(Clone)]
pub struct Pacing {
    sleeper: Arc<dyn Sleeper>,
    attempts: u32,
    interval: Duration,
    retry: RetryConfig,
}

impl Pacing {
    pub fn new(
        sleeper: Arc<dyn Sleeper>,
        polling: &PollingSettings,
        retry: &ProviderRetrySettings,
    ) -> Self {
        Self {
            sleeper,
            attempts: polling.attempts,
            interval: polling.interval(),
            retry: RetryConfig::new(retry.max_attempts, retry.backoff()),
        }
    }

    pub fn sleeper(&self) -> &dyn Sleeper {
        self.sleeper.as_ref()
    }

    /// Polls `probe` until it yields a value
    pub async fn poll<F, Fut, T>(&self, what: &str, probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        poll_until(self.sleeper(), self.attempts, self.interval, what, probe).await
    }

    /// Runs `operation`, retrying transient failures
    pub async fn retry<F, Fut, T>(&self, name: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_transient(self.sleeper(), &self.retry, name, operation).await
    }

    /// Like [`Pacing::retry`], also retrying conflicts
    ///
    /// Deletions conflict while the resource is still being detached.
    pub async fn retry_conflicts<F, Fut, T>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        self.retry(name, || {
            let attempt = operation();
            async move {
                attempt.await.map_err(|e| match e {
                    OpenStackError::Conflict(msg) => CloudError::Transient(msg),
                    other => other.into(),
                })
            }
        })
        .await
    }
}

/// Connector for one OpenStack site
pub struct OpenStackConnector {
    pub(crate) site: CloudSite,
    pub(crate) settings: Settings,
    factory: Arc<dyn DriverFactory>,
    drivers: DriverCache<Arc<dyn OpenStackApi>>,
    pub(crate) dns: Arc<dyn DnsUpdater>,
    pub(crate) pacing: Pacing,
}

impl OpenStackConnector {
    pub fn new(site: CloudSite, factory: Arc<dyn DriverFactory>) -> Self {
        Self::with_settings(site, factory, Settings::default())
    }

    pub fn with_settings(site: CloudSite, factory: Arc<dyn DriverFactory>, settings: Settings) -> Self {
        let pacing = Pacing::new(
            Arc::new(TokioSleeper),
            &settings.polling,
            &settings.provider_retry,
        );
        Self {
            dns: Arc::new(HttpDynDns::from_settings(&settings.dyndns)),
            site,
            settings,
            factory,
            drivers: DriverCache::new(),
            pacing,
        }
    }

    pub fn with_dns_updater(mut self, dns: Arc<dyn DnsUpdater>) -> Self {
        self.dns = dns;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.pacing = Pacing::new(
            sleeper,
            &self.settings.polling,
            &self.settings.provider_retry,
        );
        self
    }

    pub fn site(&self) -> &CloudSite {
        &self.site
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Authenticated client for the first usable entry of `credentials`
    ///
    /// The client is cached until the entry it was built from changes.
    pub async fn get_driver(&self, credentials: &[Credential]) -> Result<Arc<dyn OpenStackApi>> {
        let (credential, params) =
            first_compatible(&self.site, credentials, |c| auth_params(&self.site, c))
                .ok_or_else(|| CloudError::IncompatibleCredentials(NO_COMPATIBLE_AUTH.into()))?;

        let factory = self.factory.clone();
        self.drivers
            .get_or_connect(credential, || async move {
                tracing::debug!(auth_url = %params.auth_url, version = %params.auth_version, "Authenticating");
                Ok(factory.connect(&params).await?)
            })
            .await
    }
}

#[async_trait]
impl CloudConnector for OpenStackConnector {
    fn provider_type(&self) -> &str {
        PROVIDER_TYPE
    }

    fn cloud_id(&self) -> &str {
        &self.site.id
    }

    fn sleeper(&self) -> &dyn Sleeper {
        self.pacing.sleeper()
    }

    async fn concrete_system(
        &self,
        system: &System,
        credentials: &[Credential],
    ) -> Result<Vec<ConcreteSystem>> {
        let api = self.get_driver(credentials).await?;
        self.instance_types(api.as_ref(), system, true).await
    }

    async fn launch(
        &self,
        infra: &mut Infrastructure,
        system: &System,
        count: usize,
        credentials: &[Credential],
    ) -> Result<Vec<Result<VirtualMachine>>> {
        self.launch_nodes(infra, system, count, credentials).await
    }

    async fn update_vm_info(
        &self,
        infra: &mut Infrastructure,
        vm_id: &str,
        credentials: &[Credential],
    ) -> Result<()> {
        self.refresh_vm(infra, vm_id, credentials).await
    }

    async fn stop(&self, vm: &mut VirtualMachine, credentials: &[Credential]) -> Result<()> {
        self.power(vm, crate::lifecycle::PowerAction::Stop, credentials)
            .await
    }

    async fn start(&self, vm: &mut VirtualMachine, credentials: &[Credential]) -> Result<()> {
        self.power(vm, crate::lifecycle::PowerAction::Start, credentials)
            .await
    }

    async fn reboot(&self, vm: &mut VirtualMachine, credentials: &[Credential]) -> Result<()> {
        self.power(vm, crate::lifecycle::PowerAction::Reboot, credentials)
            .await
    }

    async fn alter_vm(
        &self,
        infra: &mut Infrastructure,
        vm_id: &str,
        delta: &InfrastructureSpec,
        credentials: &[Credential],
    ) -> Result<()> {
        self.alter(infra, vm_id, delta, credentials).await
    }

    async fn finalize(
        &self,
        infra: &mut Infrastructure,
        vm_id: &str,
        delete_image: bool,
        credentials: &[Credential],
    ) -> Result<CleanupReport> {
        self.finalize_vm(infra, vm_id, delete_image, credentials)
            .await
    }

    async fn create_snapshot(
        &self,
        infra: &mut Infrastructure,
        vm_id: &str,
        disk: usize,
        image_name: &str,
        auto_delete: bool,
        credentials: &[Credential],
    ) -> Result<String> {
        self.snapshot_disk(infra, vm_id, disk, image_name, auto_delete, credentials)
            .await
    }

    async fn delete_image(&self, image_uri: &str, credentials: &[Credential]) -> Result<()> {
        let api = self.get_driver(credentials).await?;
        self.remove_image(api.as_ref(), image_uri).await
    }

    async fn list_images(&self, credentials: &[Credential]) -> Result<Vec<ImageInfo>> {
        let api = self.get_driver(credentials).await?;
        self.image_catalog(api.as_ref()).await
    }

    async fn get_quotas(&self, credentials: &[Credential]) -> Result<QuotaReport> {
        let api = self.get_driver(credentials).await?;
        Ok(crate::quotas::get_quotas(api.as_ref()).await)
    }
}
