//! Declared systems and their concrete instantiations

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A system as declared by the infrastructure description
///
/// The same shape carries the observed values of a running VM, and a
/// partially filled `System` is used as the delta of `alter_vm`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct System {
    pub name: String,

    /// Lower bound on virtual CPUs
    pub cpu_count: Option<u32>,

    pub cpu_arch: Option<String>,

    /// Lower bound on memory, in MiB
    pub memory_mb: Option<u64>,

    /// Exact instance type name or wildcard pattern (`g.*`)
    pub instance_type: Option<String>,

    pub accelerators: Accelerators,

    /// Hourly price of the selected instance type
    pub price: Option<f64>,

    pub instance_tags: BTreeMap<String, String>,

    pub user_data: Option<String>,

    /// Disks ordered by index; index 0 is the boot disk
    pub disks: Vec<Disk>,

    /// Network interfaces ordered by index
    pub interfaces: Vec<NetInterface>,
}

/// GPU / accelerator attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accelerators {
    pub count: Option<u32>,
    pub kind: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
}

impl Accelerators {
    pub fn is_requested(&self) -> bool {
        self.count.is_some_and(|c| c > 0) || self.vendor.is_some() || self.model.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    pub index: usize,

    /// Image URI for the boot disk or an existing volume
    pub image_url: Option<String>,

    /// Size in GiB for blank volumes
    pub size_gb: Option<u64>,

    pub device: Option<String>,
    pub mount_path: Option<String>,
    pub fstype: Option<String>,
}

impl Disk {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn image(index: usize, url: impl Into<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            ..Self::new(index)
        }
    }

    pub fn blank(index: usize, size_gb: u64) -> Self {
        Self {
            size_gb: Some(size_gb),
            ..Self::new(index)
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_mount_path(mut self, path: impl Into<String>) -> Self {
        self.mount_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetInterface {
    pub index: usize,

    /// Declared network the interface connects to
    pub connection: String,

    /// Requested (static) or observed IPv4 address
    pub ip: Option<String>,

    pub ipv6: Option<String>,

    /// Host name; `user:secret@fqdn` requests dynamic DNS updates
    pub dns_name: Option<String>,
}

impl NetInterface {
    pub fn new(index: usize, connection: impl Into<String>) -> Self {
        Self {
            index,
            connection: connection.into(),
            ..Default::default()
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_dns_name(mut self, name: impl Into<String>) -> Self {
        self.dns_name = Some(name.into());
        self
    }
}

impl System {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_cpu(mut self, count: u32) -> Self {
        self.cpu_count = Some(count);
        self
    }

    pub fn with_memory_mb(mut self, memory: u64) -> Self {
        self.memory_mb = Some(memory);
        self
    }

    pub fn with_instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance_type = Some(instance_type.into());
        self
    }

    pub fn with_disk(mut self, disk: Disk) -> Self {
        self.set_disk(disk);
        self
    }

    pub fn with_interface(mut self, iface: NetInterface) -> Self {
        self.set_interface(iface);
        self
    }

    pub fn boot_disk(&self) -> Option<&Disk> {
        self.disk(0)
    }

    pub fn disk(&self, index: usize) -> Option<&Disk> {
        self.disks.iter().find(|d| d.index == index)
    }

    /// Returns the disk with `index`, inserting an empty one in order if missing
    pub fn disk_mut(&mut self, index: usize) -> &mut Disk {
        let pos = match self.disks.iter().position(|d| d.index >= index) {
            Some(pos) if self.disks[pos].index == index => pos,
            Some(pos) => {
                self.disks.insert(pos, Disk::new(index));
                pos
            }
            None => {
                self.disks.push(Disk::new(index));
                self.disks.len() - 1
            }
        };
        &mut self.disks[pos]
    }

    pub fn set_disk(&mut self, disk: Disk) {
        let index = disk.index;
        *self.disk_mut(index) = disk;
    }

    pub fn interface(&self, index: usize) -> Option<&NetInterface> {
        self.interfaces.iter().find(|i| i.index == index)
    }

    pub fn interface_mut(&mut self, index: usize) -> &mut NetInterface {
        let pos = match self.interfaces.iter().position(|i| i.index >= index) {
            Some(pos) if self.interfaces[pos].index == index => pos,
            Some(pos) => {
                self.interfaces.insert(pos, NetInterface::new(index, ""));
                pos
            }
            None => {
                self.interfaces.push(NetInterface::new(index, ""));
                self.interfaces.len() - 1
            }
        };
        &mut self.interfaces[pos]
    }

    pub fn set_interface(&mut self, iface: NetInterface) {
        let index = iface.index;
        *self.interface_mut(index) = iface;
    }

    /// First interface connected to `network`
    pub fn interface_on(&self, network: &str) -> Option<&NetInterface> {
        self.interfaces.iter().find(|i| i.connection == network)
    }

    /// Overrides the resource constraints with the ones set in `delta`
    pub fn merge_resources(&mut self, delta: &System) {
        if delta.cpu_count.is_some() {
            self.cpu_count = delta.cpu_count;
        }
        if delta.memory_mb.is_some() {
            self.memory_mb = delta.memory_mb;
        }
        if delta.instance_type.is_some() {
            self.instance_type = delta.instance_type.clone();
        }
        if delta.accelerators.is_requested() {
            self.accelerators = delta.accelerators.clone();
        }
    }

    pub fn has_resource_changes(&self, delta: &System) -> bool {
        (delta.cpu_count.is_some() && delta.cpu_count != self.cpu_count)
            || (delta.memory_mb.is_some() && delta.memory_mb != self.memory_mb)
            || (delta.instance_type.is_some() && delta.instance_type != self.instance_type)
    }
}

/// A system resolved against one provider instance type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcreteSystem {
    /// The declared system with the instance type attributes folded in
    pub system: System,
    pub instance_type_id: String,
    pub instance_type: String,
    pub price: f64,
    pub vcpus: u32,
    pub ram_mb: u64,
    pub disk_gb: u64,
    pub accelerators: Accelerators,
}
