//! Infrastructure and virtual machine records
//!
//! The owning layer keeps these records (and persists them); connector
//! operations receive them by reference and update them in place. Operations
//! on the same VM must be serialized by the caller.

use super::network::Network;
use super::system::System;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared networks and systems of one infrastructure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureSpec {
    pub networks: Vec<Network>,
    pub systems: Vec<System>,
}

impl InfrastructureSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.add_network(network);
        self
    }

    pub fn with_system(mut self, system: System) -> Self {
        self.systems.push(system);
        self
    }

    pub fn network(&self, id: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.id == id)
    }

    pub fn system(&self, name: &str) -> Option<&System> {
        self.systems.iter().find(|s| s.name == name)
    }

    /// Adds a network, replacing a previous declaration with the same id
    pub fn add_network(&mut self, network: Network) {
        match self.networks.iter_mut().find(|n| n.id == network.id) {
            Some(existing) => *existing = network,
            None => self.networks.push(network),
        }
    }
}

/// Resolution of a declared network to a provider network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkBinding {
    /// Declared network id
    pub network: String,
    pub provider_network_id: String,
    pub provider_network_name: String,
    pub subnet_id: Option<String>,
    pub cidr: Option<String>,
    /// Externally routable provider network
    pub external: bool,
    /// Created by the connector and owned by the infrastructure
    pub created: bool,
    /// Router the created subnet was attached to
    pub router_id: Option<String>,
}

/// A registered dynamic DNS name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRegistration {
    pub hostname: String,
    pub user: String,
    pub secret: String,
    pub ip: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Pending,
    Running,
    Stopped,
    Rebooting,
    Terminated,
    Failed,
    Unknown,
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::Pending => write!(f, "pending"),
            VmState::Running => write!(f, "running"),
            VmState::Stopped => write!(f, "stopped"),
            VmState::Rebooting => write!(f, "rebooting"),
            VmState::Terminated => write!(f, "terminated"),
            VmState::Failed => write!(f, "failed"),
            VmState::Unknown => write!(f, "unknown"),
        }
    }
}

/// A launched virtual machine
///
/// `volumes`, `floating_ips` and `dns_entries` list exactly the resources the
/// VM owns; `finalize` releases those and nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    /// Provider node id
    pub id: String,
    /// Provider node name
    pub name: String,
    pub infra_id: String,
    pub cloud_id: String,
    pub requested: System,
    pub current: System,
    pub state: VmState,
    pub volumes: Vec<String>,
    pub floating_ips: Vec<String>,
    pub dns_entries: Vec<DnsRegistration>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VirtualMachine {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        infra_id: impl Into<String>,
        cloud_id: impl Into<String>,
        system: System,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            infra_id: infra_id.into(),
            cloud_id: cloud_id.into(),
            requested: system.clone(),
            current: system,
            state: VmState::Pending,
            volumes: Vec::new(),
            floating_ips: Vec::new(),
            dns_entries: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_state(&mut self, state: VmState) {
        self.state = state;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_alive(&self) -> bool {
        self.state != VmState::Terminated
    }

    /// Current IPv4 address of the interface connected to `network`
    pub fn iface_ip(&self, network: &str) -> Option<&str> {
        self.current.interface_on(network)?.ip.as_deref()
    }
}

/// An infrastructure: its declaration, its VMs and the networks it owns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Infrastructure {
    pub id: String,
    pub spec: InfrastructureSpec,
    pub vms: Vec<VirtualMachine>,
    /// Network bindings resolved or created for this infrastructure
    pub networks: Vec<NetworkBinding>,
    /// Snapshot URIs to delete together with the infrastructure
    pub snapshots: Vec<String>,
}

impl Infrastructure {
    pub fn new(id: impl Into<String>, spec: InfrastructureSpec) -> Self {
        Self {
            id: id.into(),
            spec,
            ..Default::default()
        }
    }

    pub fn vm(&self, id: &str) -> Option<&VirtualMachine> {
        self.vms.iter().find(|vm| vm.id == id)
    }

    pub fn vm_mut(&mut self, id: &str) -> Option<&mut VirtualMachine> {
        self.vms.iter_mut().find(|vm| vm.id == id)
    }

    pub fn add_vm(&mut self, vm: VirtualMachine) {
        self.vms.push(vm);
    }

    /// VMs that have not been finalized
    pub fn live_vms(&self) -> impl Iterator<Item = &VirtualMachine> {
        self.vms.iter().filter(|vm| vm.is_alive())
    }

    pub fn binding(&self, network: &str) -> Option<&NetworkBinding> {
        self.networks.iter().find(|b| b.network == network)
    }

    pub fn set_binding(&mut self, binding: NetworkBinding) {
        match self.networks.iter_mut().find(|b| b.network == binding.network) {
            Some(existing) => *existing = binding,
            None => self.networks.push(binding),
        }
    }

    pub fn remove_binding(&mut self, network: &str) -> Option<NetworkBinding> {
        let pos = self.networks.iter().position(|b| b.network == network)?;
        Some(self.networks.remove(pos))
    }

    /// Whether a live VM other than `except` connects to `network`
    pub fn network_in_use(&self, network: &str, except: &str) -> bool {
        self.live_vms()
            .filter(|vm| vm.id != except)
            .any(|vm| vm.requested.interface_on(network).is_some())
    }
}
