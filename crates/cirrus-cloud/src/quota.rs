//! Quota normalization
//!
//! Providers report quotas per subsystem and in their own vocabulary. They are
//! folded into one [`QuotaReport`] on ingress.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaCategory {
    Cores,
    Ram,
    Instances,
    FloatingIps,
    SecurityGroups,
    Volumes,
    VolumeStorage,
}

impl QuotaCategory {
    /// Maps a provider quota key to a category
    pub fn from_provider_key(key: &str) -> Option<Self> {
        match key {
            "cores" => Some(QuotaCategory::Cores),
            "ram" => Some(QuotaCategory::Ram),
            "instances" => Some(QuotaCategory::Instances),
            "floating_ips" | "floatingip" => Some(QuotaCategory::FloatingIps),
            "security_groups" | "security_group" => Some(QuotaCategory::SecurityGroups),
            "volumes" => Some(QuotaCategory::Volumes),
            "gigabytes" | "volume_storage" => Some(QuotaCategory::VolumeStorage),
            _ => None,
        }
    }
}

impl fmt::Display for QuotaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuotaCategory::Cores => "cores",
            QuotaCategory::Ram => "ram",
            QuotaCategory::Instances => "instances",
            QuotaCategory::FloatingIps => "floating_ips",
            QuotaCategory::SecurityGroups => "security_groups",
            QuotaCategory::Volumes => "volumes",
            QuotaCategory::VolumeStorage => "volume_storage",
        };
        write!(f, "{}", name)
    }
}

/// Raw quota entry as reported by a provider subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderQuota {
    pub in_use: i64,
    pub reserved: i64,
    pub limit: i64,
}

impl ProviderQuota {
    pub fn new(in_use: i64, reserved: i64, limit: i64) -> Self {
        Self {
            in_use,
            reserved,
            limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub used: i64,
    pub limit: i64,
}

impl From<ProviderQuota> for QuotaUsage {
    fn from(q: ProviderQuota) -> Self {
        Self {
            used: q.in_use + q.reserved,
            limit: q.limit,
        }
    }
}

/// Normalized quota view across compute, network and storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaReport {
    entries: BTreeMap<QuotaCategory, QuotaUsage>,
}

impl QuotaReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one subsystem's raw quotas in
    ///
    /// Unknown keys are ignored. A category reported again overrides the
    /// previous value, so subsystems are merged from least to most
    /// authoritative.
    pub fn merge_subsystem<'a>(
        &mut self,
        subsystem: &str,
        raw: impl IntoIterator<Item = (&'a String, &'a ProviderQuota)>,
    ) {
        for (key, quota) in raw {
            match QuotaCategory::from_provider_key(key) {
                Some(category) => {
                    self.entries.insert(category, QuotaUsage::from(*quota));
                }
                None => tracing::debug!("Ignoring {} quota key {}", subsystem, key),
            }
        }
    }

    pub fn insert(&mut self, category: QuotaCategory, usage: QuotaUsage) {
        self.entries.insert(category, usage);
    }

    pub fn get(&self, category: QuotaCategory) -> Option<&QuotaUsage> {
        self.entries.get(&category)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QuotaCategory, &QuotaUsage)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(entries: &[(&str, i64, i64, i64)]) -> BTreeMap<String, ProviderQuota> {
        entries
            .iter()
            .map(|(k, in_use, reserved, limit)| {
                (k.to_string(), ProviderQuota::new(*in_use, *reserved, *limit))
            })
            .collect()
    }

    #[test]
    fn test_merge_sums_in_use_and_reserved() {
        let mut report = QuotaReport::new();
        report.merge_subsystem("compute", &raw(&[("cores", 1, 1, 4), ("floating_ips", 1, 1, 4)]));
        report.merge_subsystem("network", &raw(&[("floatingip", 2, 2, 6)]));
        report.merge_subsystem("storage", &raw(&[("gigabytes", 2, 2, 6)]));

        assert_eq!(
            report.get(QuotaCategory::Cores),
            Some(&QuotaUsage { used: 2, limit: 4 })
        );
        assert_eq!(
            report.get(QuotaCategory::FloatingIps),
            Some(&QuotaUsage { used: 4, limit: 6 })
        );
        assert_eq!(
            report.get(QuotaCategory::VolumeStorage),
            Some(&QuotaUsage { used: 4, limit: 6 })
        );
        // never reported, never defaulted
        assert_eq!(report.get(QuotaCategory::Volumes), None);
        assert_eq!(report.len(), 3);
    }

    #[test]
    fn test_serializes_as_map() {
        let mut report = QuotaReport::new();
        report.insert(QuotaCategory::SecurityGroups, QuotaUsage { used: 4, limit: 6 });

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"security_groups": {"used": 4, "limit": 6}})
        );
    }
}
