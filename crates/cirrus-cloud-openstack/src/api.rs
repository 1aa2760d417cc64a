//! OpenStack SDK contract
//!
//! The connector drives OpenStack through [`OpenStackApi`]. Implementations
//! wrap a real SDK or HTTP client; the shapes below are the only provider
//! types the rest of the crate sees.

use crate::auth::AuthParams;
use crate::error::Result;
use async_trait::async_trait;
use cirrus_cloud::{ProviderQuota, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Pending,
    Running,
    Stopped,
    Rebooting,
    Terminated,
    Error,
    Unknown,
}

/// Compute node (server)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub state: NodeState,
    pub flavor_id: String,
    /// Extended VM state, e.g. "resized" while a resize awaits confirmation
    pub vm_state: Option<String>,
    pub public_ips: Vec<String>,
    pub private_ips: Vec<String>,
    /// Addresses keyed by provider network name, when the API reports them
    pub addresses: Option<BTreeMap<String, Vec<NodeAddress>>>,
    pub volumes_attached: Vec<String>,
    /// Security group names
    pub security_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub addr: String,
    pub version: Option<u8>,
    /// "fixed" or "floating"
    pub kind: Option<String>,
}

impl NodeAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            version: None,
            kind: None,
        }
    }

    pub fn with_version(mut self, version: u8) -> Self {
        self.version = Some(version);
        self
    }
}

/// Instance type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flavor {
    pub id: String,
    pub name: String,
    pub vcpus: u32,
    pub ram_mb: u64,
    pub disk_gb: u64,
    pub price: f64,
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    /// `router:external`
    pub external: bool,
    pub subnets: Vec<String>,
    pub cidr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub network_id: String,
    pub cidr: String,
    pub host_routes: Vec<HostRoute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRoute {
    pub destination: String,
    pub nexthop: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Router {
    pub id: String,
    pub name: String,
    /// Network id of the external gateway
    pub external_gateway: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
    pub remote_cidr: String,
}

impl SecurityGroupRule {
    pub fn new(protocol: Protocol, from_port: u16, to_port: u16, remote_cidr: impl Into<String>) -> Self {
        Self {
            protocol,
            from_port,
            to_port,
            remote_cidr: remote_cidr.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub size_gb: u64,
    /// "creating", "available", "in-use", ...
    pub state: String,
    pub attachments: Vec<VolumeAttachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeAttachment {
    pub server_id: String,
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    pub ip_address: String,
    pub pool: String,
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Image,
    Blank,
    Volume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    Volume,
    Local,
}

/// Block device mapping entry of a node creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDeviceMapping {
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_type: Option<DestinationType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub boot_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_format: Option<String>,
    pub delete_on_termination: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateNodeRequest {
    pub name: String,
    pub flavor_id: String,
    /// Provider network ids
    pub networks: Vec<String>,
    /// Security group names
    pub security_groups: Vec<String>,
    pub block_devices: Vec<BlockDeviceMapping>,
    pub user_data: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Authenticated OpenStack client
#[async_trait]
pub trait OpenStackApi: Send + Sync {
    // Flavors
    async fn list_flavors(&self) -> Result<Vec<Flavor>>;
    async fn get_flavor(&self, id: &str) -> Result<Flavor>;
    async fn flavor_extra_specs(&self, id: &str) -> Result<BTreeMap<String, String>>;

    // Nodes
    async fn create_node(&self, request: &CreateNodeRequest) -> Result<Node>;
    async fn get_node(&self, id: &str) -> Result<Node>;
    async fn destroy_node(&self, id: &str) -> Result<()>;
    async fn start_node(&self, id: &str) -> Result<()>;
    async fn stop_node(&self, id: &str) -> Result<()>;
    async fn reboot_node(&self, id: &str) -> Result<()>;
    async fn resize_node(&self, id: &str, flavor_id: &str) -> Result<()>;
    async fn confirm_resize(&self, id: &str) -> Result<()>;

    // Images
    async fn list_images(&self) -> Result<Vec<Image>>;
    async fn get_image(&self, id: &str) -> Result<Image>;
    async fn create_image(&self, node_id: &str, name: &str) -> Result<Image>;
    async fn delete_image(&self, id: &str) -> Result<()>;

    // Networks
    async fn list_networks(&self) -> Result<Vec<Network>>;
    async fn create_network(&self, name: &str) -> Result<Network>;
    async fn delete_network(&self, id: &str) -> Result<()>;
    async fn list_subnets(&self) -> Result<Vec<Subnet>>;
    async fn create_subnet(
        &self,
        network_id: &str,
        name: &str,
        cidr: &str,
        dns_servers: &[String],
    ) -> Result<Subnet>;
    async fn update_subnet_routes(&self, subnet_id: &str, routes: &[HostRoute]) -> Result<()>;

    // Routers
    async fn list_routers(&self) -> Result<Vec<Router>>;
    async fn create_router(
        &self,
        name: &str,
        external_network_id: &str,
        description: &str,
    ) -> Result<Router>;
    async fn add_router_subnet(&self, router_id: &str, subnet_id: &str) -> Result<()>;
    async fn remove_router_subnet(&self, router_id: &str, subnet_id: &str) -> Result<()>;

    // Security groups
    async fn list_security_groups(&self) -> Result<Vec<SecurityGroup>>;
    async fn create_security_group(&self, name: &str, description: &str) -> Result<SecurityGroup>;
    async fn create_security_group_rule(&self, group_id: &str, rule: &SecurityGroupRule) -> Result<()>;
    async fn delete_security_group(&self, id: &str) -> Result<()>;
    async fn remove_security_group_from_node(&self, node_id: &str, group_name: &str) -> Result<()>;

    // Volumes
    async fn create_volume(&self, size_gb: u64, name: &str) -> Result<Volume>;
    async fn get_volume(&self, id: &str) -> Result<Volume>;
    async fn extend_volume(&self, id: &str, size_gb: u64) -> Result<()>;
    async fn delete_volume(&self, id: &str) -> Result<()>;
    async fn attach_volume(&self, node_id: &str, volume_id: &str, device: Option<&str>) -> Result<()>;
    async fn detach_volume(&self, volume_id: &str) -> Result<()>;

    // Floating IPs
    async fn list_floating_ip_pools(&self) -> Result<Vec<String>>;
    async fn list_floating_ips(&self) -> Result<Vec<FloatingIp>>;
    async fn create_floating_ip(&self, pool: &str) -> Result<FloatingIp>;
    async fn attach_floating_ip(&self, node_id: &str, floating_ip_id: &str) -> Result<()>;
    async fn detach_floating_ip(&self, node_id: &str, floating_ip_id: &str) -> Result<()>;
    async fn delete_floating_ip(&self, id: &str) -> Result<()>;

    // Quotas, keyed by the subsystem's own quota names
    async fn compute_quotas(&self) -> Result<BTreeMap<String, ProviderQuota>>;
    async fn network_quotas(&self) -> Result<BTreeMap<String, ProviderQuota>>;
    async fn volume_quotas(&self) -> Result<BTreeMap<String, ProviderQuota>>;
}

/// Builds authenticated clients
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn connect(&self, params: &AuthParams) -> Result<Arc<dyn OpenStackApi>>;
}
