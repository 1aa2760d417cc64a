//! Declarative infrastructure model and the records built from it

mod infra;
mod network;
mod system;

pub use infra::{
    DnsRegistration, Infrastructure, InfrastructureSpec, NetworkBinding, VirtualMachine, VmState,
};
pub use network::{Network, PortRange, Protocol, RouterTarget};
pub use system::{Accelerators, ConcreteSystem, Disk, NetInterface, System};
