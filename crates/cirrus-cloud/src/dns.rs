//! Dynamic DNS side channel
//!
//! A requested DNS name of the form `user:secret@host.domain` carries the
//! credentials of a dynamic DNS service. When the public address of the VM
//! changes, the name is registered again through a [`DnsUpdater`].

use crate::error::{CloudError, Result};
use crate::model::DnsRegistration;
use async_trait::async_trait;

/// Basic-auth user marker meaning "authenticate as the host name itself"
pub const HOSTNAME_USER: &str = "dydns";

#[async_trait]
pub trait DnsUpdater: Send + Sync {
    /// Points `entry.hostname` at `entry.ip`
    async fn register(&self, entry: &DnsRegistration) -> Result<()>;

    /// Takes `entry.hostname` offline
    async fn deregister(&self, entry: &DnsRegistration) -> Result<()>;
}

/// Splits `user:secret@host` into a registration for `ip`
///
/// Returns `None` for plain DNS names.
pub fn parse_update_name(dns_name: &str, ip: &str) -> Option<DnsRegistration> {
    let (creds, hostname) = dns_name.rsplit_once('@')?;
    let (user, secret) = creds.split_once(':')?;
    if user.is_empty() || hostname.is_empty() {
        return None;
    }

    Some(DnsRegistration {
        hostname: hostname.to_string(),
        user: user.to_string(),
        secret: secret.to_string(),
        ip: ip.to_string(),
    })
}

/// nsupdate-style HTTP updater
pub struct HttpDynDns {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDynDns {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn from_settings(settings: &cirrus_config::DynDnsSettings) -> Self {
        Self::new(settings.endpoint.clone())
    }

    fn auth_user(entry: &DnsRegistration) -> &str {
        if entry.user == HOSTNAME_USER {
            &entry.hostname
        } else {
            &entry.user
        }
    }

    async fn send(&self, entry: &DnsRegistration, query: &[(&str, &str)]) -> Result<()> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(query)
            .basic_auth(Self::auth_user(entry), Some(&entry.secret))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(CloudError::ApiError(format!(
                "DNS update of {} failed ({}): {}",
                entry.hostname,
                status,
                body.trim()
            )));
        }

        tracing::debug!(hostname = %entry.hostname, response = %body.trim(), "DNS updated");
        Ok(())
    }
}

#[async_trait]
impl DnsUpdater for HttpDynDns {
    async fn register(&self, entry: &DnsRegistration) -> Result<()> {
        tracing::info!(hostname = %entry.hostname, ip = %entry.ip, "Registering DNS name");
        self.send(entry, &[("hostname", &entry.hostname), ("myip", &entry.ip)])
            .await
    }

    async fn deregister(&self, entry: &DnsRegistration) -> Result<()> {
        tracing::info!(hostname = %entry.hostname, "Deregistering DNS name");
        self.send(entry, &[("hostname", &entry.hostname), ("offline", "yes")])
            .await
    }
}
