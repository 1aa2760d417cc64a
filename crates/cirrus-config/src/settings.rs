//! Connector settings
//!
//! Every section is optional in the YAML file; missing values fall back to
//! the defaults below.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub launch: LaunchSettings,
    pub network: NetworkSettings,
    pub polling: PollingSettings,
    pub provider_retry: ProviderRetrySettings,
    pub dyndns: DynDnsSettings,
    pub store: StoreSettings,
}

/// Retry behaviour of `launch_with_retry`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSettings {
    pub max_retries: u32,
    pub wait_seconds: u64,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            wait_seconds: 5,
        }
    }
}

impl LaunchSettings {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_seconds)
    }
}

/// Naming and addressing of resources the connector creates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Prefix for generated network, router and security group names
    pub resource_prefix: String,
    /// Wildcard pattern used to allocate subnets for created networks
    pub default_cidr: String,
    pub router_description: String,
    pub security_group_description: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            resource_prefix: "cirrus".to_string(),
            default_cidr: "10.0.*.0/24".to_string(),
            router_description: "Cirrus created router".to_string(),
            security_group_description: "Security group created by Cirrus".to_string(),
        }
    }
}

/// Polling of asynchronous provider state changes (resize, volume status)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub attempts: u32,
    pub interval_seconds: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval_seconds: 2,
        }
    }
}

impl PollingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Internal retry of transient provider errors (rate limits, locks, timeouts)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderRetrySettings {
    pub max_attempts: u32,
    pub backoff_seconds: u64,
}

impl Default for ProviderRetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_seconds: 2,
        }
    }
}

impl ProviderRetrySettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynDnsSettings {
    pub endpoint: String,
}

impl Default for DynDnsSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://nsupdate.fedcloud.eu/nic/update".to_string(),
        }
    }
}

/// Persistent infrastructure store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub url: String,
    pub max_retries: u32,
    pub retry_sleep_seconds: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://cirrus.db".to_string(),
            max_retries: 15,
            retry_sleep_seconds: 2,
        }
    }
}

impl StoreSettings {
    pub fn retry_sleep(&self) -> Duration {
        Duration::from_secs(self.retry_sleep_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
launch:
  max_retries: 5
network:
  resource_prefix: im
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(settings.launch.max_retries, 5);
        assert_eq!(settings.launch.wait_seconds, 5);
        assert_eq!(settings.network.resource_prefix, "im");
        assert_eq!(settings.network.default_cidr, "10.0.*.0/24");
        assert_eq!(settings.store, StoreSettings::default());
    }

    #[test]
    fn test_durations() {
        let settings = Settings::default();
        assert_eq!(settings.launch.wait(), Duration::from_secs(5));
        assert_eq!(settings.polling.interval(), Duration::from_secs(2));
        assert_eq!(settings.store.retry_sleep(), Duration::from_secs(2));
    }
}
