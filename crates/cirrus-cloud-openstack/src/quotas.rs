//! Quota aggregation across compute, network and block storage

use crate::api::OpenStackApi;
use cirrus_cloud::{ProviderQuota, QuotaCategory, QuotaReport, QuotaUsage};
use std::collections::BTreeMap;

const MB_PER_GB: i64 = 1024;

/// Folds the three quota sets into one report
///
/// Compute reports RAM in MiB; the report carries GiB. Network quotas are
/// merged after compute so that their floating IP and security group counts
/// win. A subsystem that cannot be queried is left out.
pub async fn get_quotas(api: &dyn OpenStackApi) -> QuotaReport {
    let mut report = QuotaReport::new();

    match api.compute_quotas().await {
        Ok(compute) => {
            report.merge_subsystem("compute", &compute);
            if let Some(ram) = compute.get("ram") {
                report.insert(QuotaCategory::Ram, ram_in_gb(ram));
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not get compute quotas"),
    }

    merge(&mut report, "network", api.network_quotas().await);
    merge(&mut report, "storage", api.volume_quotas().await);

    report
}

fn merge(
    report: &mut QuotaReport,
    subsystem: &str,
    raw: crate::error::Result<BTreeMap<String, ProviderQuota>>,
) {
    match raw {
        Ok(raw) => report.merge_subsystem(subsystem, &raw),
        Err(e) => tracing::warn!(error = %e, "Could not get {} quotas", subsystem),
    }
}

fn ram_in_gb(ram: &ProviderQuota) -> QuotaUsage {
    let usage = QuotaUsage::from(*ram);
    QuotaUsage {
        used: usage.used / MB_PER_GB,
        // unlimited stays unlimited
        limit: if usage.limit < 0 {
            usage.limit
        } else {
            usage.limit / MB_PER_GB
        },
    }
}
