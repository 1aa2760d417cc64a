//! Cloud connector trait and the registry that dispatches on provider type

use crate::credentials::Credential;
use crate::error::{CloudError, Result};
use crate::model::{ConcreteSystem, Infrastructure, InfrastructureSpec, System, VirtualMachine};
use crate::quota::QuotaReport;
use crate::report::CleanupReport;
use crate::retry::{Sleeper, TokioSleeper};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Cloud connector abstraction
///
/// Every provider implements this trait. Records are owned by the caller and
/// passed in by reference; operations on the same VM must not run
/// concurrently.
#[async_trait]
pub trait CloudConnector: Send + Sync {
    /// Provider type tag the connector is registered under, e.g. "OpenStack"
    fn provider_type(&self) -> &str;

    /// Id of the cloud site this connector talks to
    fn cloud_id(&self) -> &str;

    /// Delay used between launch attempts
    fn sleeper(&self) -> &dyn Sleeper {
        &TokioSleeper
    }

    /// Instance types able to host `system`, best match first
    async fn concrete_system(
        &self,
        system: &System,
        credentials: &[Credential],
    ) -> Result<Vec<ConcreteSystem>>;

    /// Creates `count` nodes for `system`
    ///
    /// Returns one result per requested node. Launched VMs are also added to
    /// `infra`. A failure of one node does not abort the others.
    async fn launch(
        &self,
        infra: &mut Infrastructure,
        system: &System,
        count: usize,
        credentials: &[Credential],
    ) -> Result<Vec<Result<VirtualMachine>>>;

    /// Launches `count` nodes, launching the failed ones again
    ///
    /// Permanent failures are not retried. The wait between attempts is
    /// raced against `cancel`; once cancelled, nodes still pending report
    /// [`CloudError::Cancelled`] and nodes already launched are kept in
    /// `infra` for cleanup.
    async fn launch_with_retry(
        &self,
        infra: &mut Infrastructure,
        system: &System,
        count: usize,
        credentials: &[Credential],
        retry: &LaunchRetry,
        cancel: &CancellationToken,
    ) -> Vec<Result<VirtualMachine>> {
        let mut results: Vec<Option<Result<VirtualMachine>>> = (0..count).map(|_| None).collect();
        let mut pending: Vec<usize> = (0..count).collect();
        let attempts = retry.max_retries.max(1);

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                break;
            }

            let batch = match self.launch(infra, system, pending.len(), credentials).await {
                Ok(batch) => batch,
                Err(e) => vec![Err(e); pending.len()],
            };
            let mut batch = batch.into_iter();

            let mut failed = Vec::new();
            for slot in pending {
                let outcome = batch.next().unwrap_or_else(|| {
                    Err(CloudError::ApiError("provider returned no result".into()))
                });
                match outcome {
                    Ok(vm) => results[slot] = Some(Ok(vm)),
                    Err(e) => {
                        if !e.is_permanent() {
                            failed.push(slot);
                        }
                        results[slot] = Some(Err(e));
                    }
                }
            }
            pending = failed;

            if pending.is_empty() || attempt == attempts {
                break;
            }

            tracing::warn!(
                system = %system.name,
                attempt = attempt,
                failed = pending.len(),
                "Launch failed for some nodes, retrying in {:?}",
                retry.wait
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.sleeper().sleep(retry.wait) => {}
            }
        }

        if cancel.is_cancelled() {
            for slot in pending {
                results[slot] = Some(Err(CloudError::Cancelled(format!(
                    "launch of {} cancelled",
                    system.name
                ))));
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    Err(CloudError::Cancelled(format!("launch of {} cancelled", system.name)))
                })
            })
            .collect()
    }

    /// Refreshes the VM from the provider and reconciles addresses, volumes,
    /// floating IPs, host routes and DNS registrations
    async fn update_vm_info(
        &self,
        infra: &mut Infrastructure,
        vm_id: &str,
        credentials: &[Credential],
    ) -> Result<()>;

    async fn stop(&self, vm: &mut VirtualMachine, credentials: &[Credential]) -> Result<()>;

    async fn start(&self, vm: &mut VirtualMachine, credentials: &[Credential]) -> Result<()>;

    async fn reboot(&self, vm: &mut VirtualMachine, credentials: &[Credential]) -> Result<()>;

    /// Applies the first system and the networks of `delta` to a running VM
    async fn alter_vm(
        &self,
        infra: &mut Infrastructure,
        vm_id: &str,
        delta: &InfrastructureSpec,
        credentials: &[Credential],
    ) -> Result<()>;

    /// Releases everything the VM owns
    async fn finalize(
        &self,
        infra: &mut Infrastructure,
        vm_id: &str,
        delete_image: bool,
        credentials: &[Credential],
    ) -> Result<CleanupReport>;

    /// Snapshots disk `disk` of the VM and returns the image URI
    async fn create_snapshot(
        &self,
        _infra: &mut Infrastructure,
        _vm_id: &str,
        _disk: usize,
        _image_name: &str,
        _auto_delete: bool,
        _credentials: &[Credential],
    ) -> Result<String> {
        Err(CloudError::UnsupportedOperation(format!(
            "create_snapshot on {}",
            self.provider_type()
        )))
    }

    async fn delete_image(&self, _image_uri: &str, _credentials: &[Credential]) -> Result<()> {
        Err(CloudError::UnsupportedOperation(format!(
            "delete_image on {}",
            self.provider_type()
        )))
    }

    async fn list_images(&self, _credentials: &[Credential]) -> Result<Vec<ImageInfo>> {
        Err(CloudError::UnsupportedOperation(format!(
            "list_images on {}",
            self.provider_type()
        )))
    }

    async fn get_quotas(&self, _credentials: &[Credential]) -> Result<QuotaReport> {
        Err(CloudError::UnsupportedOperation(format!(
            "get_quotas on {}",
            self.provider_type()
        )))
    }
}

/// Attempt bounds of `launch_with_retry`
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRetry {
    /// Total launch attempts, the first one included
    pub max_retries: u32,
    pub wait: Duration,
}

impl Default for LaunchRetry {
    fn default() -> Self {
        Self::from_settings(&cirrus_config::LaunchSettings::default())
    }
}

impl LaunchRetry {
    pub fn new(max_retries: u32, wait: Duration) -> Self {
        Self { max_retries, wait }
    }

    pub fn from_settings(settings: &cirrus_config::LaunchSettings) -> Self {
        Self::new(settings.max_retries, settings.wait())
    }
}

/// One entry of the provider image catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub uri: String,
    pub name: String,
}

/// Connectors indexed by provider type tag
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn CloudConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: Arc<dyn CloudConnector>) {
        let key = connector.provider_type().to_ascii_lowercase();
        tracing::debug!("Registering connector {}", connector.provider_type());
        self.connectors.insert(key, connector);
    }

    /// Connector for `provider_type` (case-insensitive)
    pub fn get(&self, provider_type: &str) -> Result<Arc<dyn CloudConnector>> {
        self.connectors
            .get(&provider_type.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| CloudError::ProviderNotFound(provider_type.to_string()))
    }

    pub fn provider_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.connectors.values().map(|c| c.provider_type()).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}
