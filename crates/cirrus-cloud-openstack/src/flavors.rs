//! Flavor catalog and instance type selection

use crate::api::{Flavor, OpenStackApi};
use crate::error::Result;
use cirrus_cloud::{Accelerators, ConcreteSystem, System};
use std::cmp::Ordering;

const PCI_ALIAS_KEY: &str = "pci_passthrough:alias";
const ACCELERATOR_NUMBER: &str = "Accelerator:Number";
const ACCELERATOR_VENDOR: &str = "Accelerator:Vendor";
const ACCELERATOR_MODEL: &str = "Accelerator:Model";
const ACCELERATOR_TYPE: &str = "Accelerator:Type";

/// A flavor with its extra specs folded in
#[derive(Debug, Clone, PartialEq)]
pub struct FlavorDetails {
    pub flavor: Flavor,
    /// Devices requested through PCI passthrough aliases
    pub pci_devices: u32,
    pub accelerators: Accelerators,
}

impl FlavorDetails {
    pub fn from_flavor(flavor: Flavor) -> Self {
        let pci_devices = flavor
            .extra
            .get(PCI_ALIAS_KEY)
            .map(|alias| pci_device_count(alias))
            .unwrap_or(0);
        let mut accelerators = accelerators_from_specs(&flavor.extra);
        if accelerators.count.is_none() && pci_devices > 0 {
            accelerators.count = Some(pci_devices);
        }

        Self {
            flavor,
            pci_devices,
            accelerators,
        }
    }

    pub fn accelerator_count(&self) -> u32 {
        self.accelerators.count.unwrap_or(0)
    }
}

/// Sums the counts of a `KIND:count,KIND:count` alias list
pub fn pci_device_count(alias: &str) -> u32 {
    alias
        .split(',')
        .filter_map(|entry| entry.split_once(':'))
        .filter_map(|(_, count)| count.trim().parse::<u32>().ok())
        .sum()
}

/// Reads `Accelerator:*` extra specs
pub fn accelerators_from_specs<'a>(
    specs: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Accelerators {
    let mut accelerators = Accelerators::default();
    for (key, value) in specs {
        match key.as_str() {
            // reported as a float, e.g. "1.0"
            ACCELERATOR_NUMBER => {
                accelerators.count = value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| *n >= 0.0)
                    .map(|n| n as u32);
            }
            ACCELERATOR_VENDOR => accelerators.vendor = Some(value.clone()),
            ACCELERATOR_MODEL => accelerators.model = Some(value.clone()),
            ACCELERATOR_TYPE => accelerators.kind = Some(value.to_ascii_lowercase()),
            _ => {}
        }
    }
    accelerators
}

/// Lists flavors with their extra specs
///
/// Extra spec lookups that fail leave the flavor with the specs the listing
/// already carried.
pub async fn list_flavor_details(api: &dyn OpenStackApi) -> Result<Vec<FlavorDetails>> {
    let flavors = api.list_flavors().await?;
    let mut details = Vec::with_capacity(flavors.len());

    for mut flavor in flavors {
        match api.flavor_extra_specs(&flavor.id).await {
            Ok(specs) => flavor.extra.extend(specs),
            Err(e) => tracing::debug!(flavor = %flavor.name, error = %e, "No extra specs"),
        }
        details.push(FlavorDetails::from_flavor(flavor));
    }

    Ok(details)
}

fn name_matches(pattern: &str, name: &str) -> bool {
    if pattern == name {
        return true;
    }
    glob::Pattern::new(pattern)
        .map(|p| p.matches(name))
        .unwrap_or(false)
}

fn satisfies(system: &System, details: &FlavorDetails) -> bool {
    let flavor = &details.flavor;

    if system.cpu_count.is_some_and(|cpu| flavor.vcpus < cpu) {
        return false;
    }
    if system.memory_mb.is_some_and(|mem| flavor.ram_mb < mem) {
        return false;
    }
    if let Some(pattern) = &system.instance_type {
        if !name_matches(pattern, &flavor.name) {
            return false;
        }
    }

    let wanted = &system.accelerators;
    if wanted.is_requested() {
        if details.accelerator_count() < wanted.count.unwrap_or(1) {
            return false;
        }
        let same = |want: &Option<String>, have: &Option<String>| match (want, have) {
            (Some(w), Some(h)) => w.eq_ignore_ascii_case(h),
            (Some(_), None) => false,
            (None, _) => true,
        };
        if !same(&wanted.vendor, &details.accelerators.vendor)
            || !same(&wanted.model, &details.accelerators.model)
        {
            return false;
        }
    } else if system.instance_type.is_none() && details.accelerator_count() > 0 {
        // accelerator flavors only when asked for
        return false;
    }

    true
}

fn rank(system: &System, a: &FlavorDetails, b: &FlavorDetails) -> Ordering {
    let wanted_ram = system.memory_mb.unwrap_or(0);
    a.flavor
        .price
        .partial_cmp(&b.flavor.price)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            let da = a.flavor.ram_mb.saturating_sub(wanted_ram);
            let db = b.flavor.ram_mb.saturating_sub(wanted_ram);
            da.cmp(&db)
        })
        .then_with(|| a.flavor.name.cmp(&b.flavor.name))
}

/// Instance types able to host `system`, cheapest and closest first
pub fn select_instance_types(system: &System, catalog: &[FlavorDetails]) -> Vec<ConcreteSystem> {
    let mut candidates: Vec<&FlavorDetails> =
        catalog.iter().filter(|d| satisfies(system, d)).collect();
    candidates.sort_by(|a, b| rank(system, a, b));

    candidates
        .into_iter()
        .map(|details| concrete(system, details))
        .collect()
}

fn concrete(system: &System, details: &FlavorDetails) -> ConcreteSystem {
    let flavor = &details.flavor;
    let mut resolved = system.clone();
    resolved.instance_type = Some(flavor.name.clone());
    resolved.cpu_count = Some(flavor.vcpus);
    resolved.memory_mb = Some(flavor.ram_mb);
    resolved.price = Some(flavor.price);
    if details.accelerator_count() > 0 {
        resolved.accelerators = details.accelerators.clone();
    }

    ConcreteSystem {
        system: resolved,
        instance_type_id: flavor.id.clone(),
        instance_type: flavor.name.clone(),
        price: flavor.price,
        vcpus: flavor.vcpus,
        ram_mb: flavor.ram_mb,
        disk_gb: flavor.disk_gb,
        accelerators: details.accelerators.clone(),
    }
}
