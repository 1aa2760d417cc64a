#![allow(dead_code)]

use async_trait::async_trait;
use cirrus_cloud::{
    CloudSite, Credential, DnsRegistration, DnsUpdater, ProviderQuota, Sleeper,
};
use cirrus_cloud_openstack::api::{
    CreateNodeRequest, Flavor, FloatingIp, HostRoute, Image, Network, Node, NodeState, Router,
    SecurityGroup, SecurityGroupRule, Subnet, Volume, VolumeAttachment,
};
use cirrus_cloud_openstack::{
    AuthParams, DriverFactory, OpenStackApi, OpenStackConnector, OpenStackError, Result,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Everything the fake provider holds
#[derive(Default)]
pub struct CloudState {
    pub flavors: Vec<Flavor>,
    pub extra_specs: BTreeMap<String, BTreeMap<String, String>>,
    pub nodes: BTreeMap<String, Node>,
    pub images: Vec<Image>,
    pub networks: Vec<Network>,
    pub subnets: Vec<Subnet>,
    pub routers: Vec<Router>,
    pub groups: Vec<SecurityGroup>,
    pub rules: Vec<(String, SecurityGroupRule)>,
    pub volumes: BTreeMap<String, Volume>,
    pub pools: Vec<String>,
    pub floating_ips: Vec<FloatingIp>,
    pub compute_quotas: Option<BTreeMap<String, ProviderQuota>>,
    pub network_quotas: Option<BTreeMap<String, ProviderQuota>>,
    pub volume_quotas: Option<BTreeMap<String, ProviderQuota>>,
    /// Node creation requests, in order
    pub requests: Vec<CreateNodeRequest>,
    /// Mutating calls as `operation:arg[:arg]`
    pub calls: Vec<String>,
    /// Node creations to fail before succeeding again
    pub failing_creates: u32,
    /// Volume lookups fail with an API error
    pub failing_volume_reads: bool,
    next_id: u32,
}

impl CloudState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }
}

/// In-memory OpenStack
#[derive(Default)]
pub struct FakeCloud {
    pub state: Mutex<CloudState>,
}

fn not_found(what: &str, id: &str) -> OpenStackError {
    OpenStackError::NotFound(format!("{} {}", what, id))
}

impl FakeCloud {
    /// A site with a private and an external network, one pool and two
    /// flavors ("small" and the GPU "g.small")
    pub fn standard() -> Arc<Self> {
        let cloud = Self::default();
        {
            let mut s = cloud.state.lock().unwrap();
            s.flavors = vec![flavor("1", "small", 1, 512, 1.0), flavor("2", "g.small", 1, 512, 1.0)];
            s.extra_specs.insert(
                "2".into(),
                BTreeMap::from([("pci_passthrough:alias".to_string(), "GPU:2".to_string())]),
            );
            s.images.push(Image {
                id: "imageid".into(),
                name: "ubuntu".into(),
                status: "active".into(),
            });
            s.networks.push(Network {
                id: "net1".into(),
                name: "private".into(),
                external: false,
                subnets: vec!["subnet1".into()],
                cidr: Some("10.0.0.0/24".into()),
            });
            s.networks.push(Network {
                id: "extnet".into(),
                name: "external".into(),
                external: true,
                subnets: Vec::new(),
                cidr: None,
            });
            s.subnets.push(Subnet {
                id: "subnet1".into(),
                network_id: "net1".into(),
                cidr: "10.0.0.0/24".into(),
                host_routes: Vec::new(),
            });
            s.pools.push("pool1".into());
        }
        Arc::new(cloud)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_starting(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.state.lock().unwrap().nodes.get(id).cloned()
    }

    pub fn with_node<F: FnOnce(&mut Node)>(&self, id: &str, f: F) {
        let mut s = self.state.lock().unwrap();
        if let Some(node) = s.nodes.get_mut(id) {
            f(node);
        }
    }

    pub fn group(&self, name: &str) -> Option<SecurityGroup> {
        let s = self.state.lock().unwrap();
        s.groups.iter().find(|g| g.name == name).cloned()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

pub fn flavor(id: &str, name: &str, vcpus: u32, ram_mb: u64, price: f64) -> Flavor {
    Flavor {
        id: id.into(),
        name: name.into(),
        vcpus,
        ram_mb,
        disk_gb: 1,
        price,
        extra: BTreeMap::new(),
    }
}

#[async_trait]
impl OpenStackApi for FakeCloud {
    async fn list_flavors(&self) -> Result<Vec<Flavor>> {
        Ok(self.state.lock().unwrap().flavors.clone())
    }

    async fn get_flavor(&self, id: &str) -> Result<Flavor> {
        let s = self.state.lock().unwrap();
        s.flavors
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| not_found("flavor", id))
    }

    async fn flavor_extra_specs(&self, id: &str) -> Result<BTreeMap<String, String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .extra_specs
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_node(&self, request: &CreateNodeRequest) -> Result<Node> {
        let mut s = self.state.lock().unwrap();
        s.requests.push(request.clone());
        if s.failing_creates > 0 {
            s.failing_creates -= 1;
            return Err(OpenStackError::Api("Error creating VM".into()));
        }

        let id = s.next_id("node");
        let node = Node {
            id: id.clone(),
            name: request.name.clone(),
            state: NodeState::Running,
            flavor_id: request.flavor_id.clone(),
            vm_state: None,
            public_ips: Vec::new(),
            private_ips: vec!["10.0.0.1".into()],
            addresses: None,
            volumes_attached: Vec::new(),
            security_groups: request.security_groups.clone(),
        };
        s.nodes.insert(id.clone(), node.clone());
        s.calls.push(format!("create_node:{}", id));
        Ok(node)
    }

    async fn get_node(&self, id: &str) -> Result<Node> {
        self.node(id).ok_or_else(|| not_found("node", id))
    }

    async fn destroy_node(&self, id: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.nodes.remove(id).ok_or_else(|| not_found("node", id))?;
        s.calls.push(format!("destroy_node:{}", id));
        Ok(())
    }

    async fn start_node(&self, id: &str) -> Result<()> {
        self.record(format!("start_node:{}", id));
        self.with_node(id, |n| n.state = NodeState::Running);
        Ok(())
    }

    async fn stop_node(&self, id: &str) -> Result<()> {
        self.record(format!("stop_node:{}", id));
        self.with_node(id, |n| n.state = NodeState::Stopped);
        Ok(())
    }

    async fn reboot_node(&self, id: &str) -> Result<()> {
        self.record(format!("reboot_node:{}", id));
        Ok(())
    }

    async fn resize_node(&self, id: &str, flavor_id: &str) -> Result<()> {
        self.record(format!("resize_node:{}:{}", id, flavor_id));
        self.with_node(id, |n| {
            n.flavor_id = flavor_id.to_string();
            n.vm_state = Some("resized".into());
        });
        Ok(())
    }

    async fn confirm_resize(&self, id: &str) -> Result<()> {
        self.record(format!("confirm_resize:{}", id));
        self.with_node(id, |n| n.vm_state = None);
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        Ok(self.state.lock().unwrap().images.clone())
    }

    async fn get_image(&self, id: &str) -> Result<Image> {
        let s = self.state.lock().unwrap();
        s.images
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| not_found("image", id))
    }

    async fn create_image(&self, node_id: &str, name: &str) -> Result<Image> {
        let mut s = self.state.lock().unwrap();
        let image = Image {
            id: "newimage".into(),
            name: name.into(),
            status: "active".into(),
        };
        s.images.push(image.clone());
        s.calls.push(format!("create_image:{}:{}", node_id, name));
        Ok(image)
    }

    async fn delete_image(&self, id: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.images.retain(|i| i.id != id);
        s.calls.push(format!("delete_image:{}", id));
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<Network>> {
        Ok(self.state.lock().unwrap().networks.clone())
    }

    async fn create_network(&self, name: &str) -> Result<Network> {
        let mut s = self.state.lock().unwrap();
        let network = Network {
            id: s.next_id("net-"),
            name: name.into(),
            external: false,
            subnets: Vec::new(),
            cidr: None,
        };
        s.networks.push(network.clone());
        s.calls.push(format!("create_network:{}", name));
        Ok(network)
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if !s.networks.iter().any(|n| n.id == id) {
            return Err(not_found("network", id));
        }
        s.networks.retain(|n| n.id != id);
        s.subnets.retain(|sn| sn.network_id != id);
        s.calls.push(format!("delete_network:{}", id));
        Ok(())
    }

    async fn list_subnets(&self) -> Result<Vec<Subnet>> {
        Ok(self.state.lock().unwrap().subnets.clone())
    }

    async fn create_subnet(
        &self,
        network_id: &str,
        name: &str,
        cidr: &str,
        dns_servers: &[String],
    ) -> Result<Subnet> {
        let mut s = self.state.lock().unwrap();
        let subnet = Subnet {
            id: s.next_id("subnet-"),
            network_id: network_id.into(),
            cidr: cidr.into(),
            host_routes: Vec::new(),
        };
        s.subnets.push(subnet.clone());
        s.calls.push(format!(
            "create_subnet:{}:{}:{}:{}",
            name,
            network_id,
            cidr,
            dns_servers.join(",")
        ));
        Ok(subnet)
    }

    async fn update_subnet_routes(&self, subnet_id: &str, routes: &[HostRoute]) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let subnet = s
            .subnets
            .iter_mut()
            .find(|sn| sn.id == subnet_id)
            .ok_or_else(|| not_found("subnet", subnet_id))?;
        subnet.host_routes = routes.to_vec();
        s.calls.push(format!("update_subnet_routes:{}", subnet_id));
        Ok(())
    }

    async fn list_routers(&self) -> Result<Vec<Router>> {
        Ok(self.state.lock().unwrap().routers.clone())
    }

    async fn create_router(
        &self,
        name: &str,
        external_network_id: &str,
        description: &str,
    ) -> Result<Router> {
        let mut s = self.state.lock().unwrap();
        let router = Router {
            id: s.next_id("router-"),
            name: name.into(),
            external_gateway: Some(external_network_id.into()),
        };
        s.routers.push(router.clone());
        s.calls.push(format!(
            "create_router:{}:{}:{}",
            name, external_network_id, description
        ));
        Ok(router)
    }

    async fn add_router_subnet(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        self.record(format!("add_router_subnet:{}:{}", router_id, subnet_id));
        Ok(())
    }

    async fn remove_router_subnet(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        self.record(format!("remove_router_subnet:{}:{}", router_id, subnet_id));
        Ok(())
    }

    async fn list_security_groups(&self) -> Result<Vec<SecurityGroup>> {
        Ok(self.state.lock().unwrap().groups.clone())
    }

    async fn create_security_group(&self, name: &str, description: &str) -> Result<SecurityGroup> {
        let mut s = self.state.lock().unwrap();
        let group = SecurityGroup {
            id: s.next_id("sg-"),
            name: name.into(),
            description: description.into(),
        };
        s.groups.push(group.clone());
        s.calls.push(format!("create_security_group:{}", name));
        Ok(group)
    }

    async fn create_security_group_rule(&self, group_id: &str, rule: &SecurityGroupRule) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.rules.push((group_id.to_string(), rule.clone()));
        Ok(())
    }

    async fn delete_security_group(&self, id: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let group = s
            .groups
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| not_found("security group", id))?;
        s.groups.retain(|g| g.id != id);
        s.calls.push(format!("delete_security_group:{}", group.name));
        Ok(())
    }

    async fn remove_security_group_from_node(&self, node_id: &str, group_name: &str) -> Result<()> {
        self.node(node_id).ok_or_else(|| not_found("node", node_id))?;
        self.record(format!("remove_security_group_from_node:{}:{}", node_id, group_name));
        Ok(())
    }

    async fn create_volume(&self, size_gb: u64, name: &str) -> Result<Volume> {
        let mut s = self.state.lock().unwrap();
        let volume = Volume {
            id: s.next_id("vol-"),
            size_gb,
            state: "available".into(),
            attachments: Vec::new(),
        };
        s.volumes.insert(volume.id.clone(), volume.clone());
        s.calls.push(format!("create_volume:{}:{}", name, size_gb));
        Ok(volume)
    }

    async fn get_volume(&self, id: &str) -> Result<Volume> {
        let s = self.state.lock().unwrap();
        if s.failing_volume_reads {
            return Err(OpenStackError::Api("volume service unavailable".into()));
        }
        s.volumes.get(id).cloned().ok_or_else(|| not_found("volume", id))
    }

    async fn extend_volume(&self, id: &str, size_gb: u64) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let volume = s.volumes.get_mut(id).ok_or_else(|| not_found("volume", id))?;
        volume.size_gb = size_gb;
        s.calls.push(format!("extend_volume:{}:{}", id, size_gb));
        Ok(())
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.volumes.remove(id).ok_or_else(|| not_found("volume", id))?;
        s.calls.push(format!("delete_volume:{}", id));
        Ok(())
    }

    async fn attach_volume(&self, node_id: &str, volume_id: &str, device: Option<&str>) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let device = device.map(|d| format!("/dev/{}", d)).unwrap_or_else(|| "/dev/hdc".into());
        let volume = s
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| not_found("volume", volume_id))?;
        volume.state = "in-use".into();
        volume.attachments = vec![VolumeAttachment {
            server_id: node_id.into(),
            device,
        }];
        if let Some(node) = s.nodes.get_mut(node_id) {
            node.volumes_attached.push(volume_id.into());
        }
        s.calls.push(format!("attach_volume:{}:{}", node_id, volume_id));
        Ok(())
    }

    async fn detach_volume(&self, volume_id: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let volume = s
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| not_found("volume", volume_id))?;
        volume.state = "available".into();
        volume.attachments.clear();
        for node in s.nodes.values_mut() {
            node.volumes_attached.retain(|v| v != volume_id);
        }
        s.calls.push(format!("detach_volume:{}", volume_id));
        Ok(())
    }

    async fn list_floating_ip_pools(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().pools.clone())
    }

    async fn list_floating_ips(&self) -> Result<Vec<FloatingIp>> {
        Ok(self.state.lock().unwrap().floating_ips.clone())
    }

    async fn create_floating_ip(&self, pool: &str) -> Result<FloatingIp> {
        let mut s = self.state.lock().unwrap();
        let id = s.next_id("fip-");
        let fip = FloatingIp {
            ip_address: format!("8.8.8.{}", s.next_id),
            id,
            pool: pool.into(),
            node_id: None,
        };
        s.floating_ips.push(fip.clone());
        s.calls.push(format!("create_floating_ip:{}", pool));
        Ok(fip)
    }

    async fn attach_floating_ip(&self, node_id: &str, floating_ip_id: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let fip = s
            .floating_ips
            .iter_mut()
            .find(|f| f.id == floating_ip_id)
            .ok_or_else(|| not_found("floating IP", floating_ip_id))?;
        fip.node_id = Some(node_id.into());
        let ip = fip.ip_address.clone();
        if let Some(node) = s.nodes.get_mut(node_id) {
            node.public_ips.push(ip.clone());
        }
        s.calls.push(format!("attach_floating_ip:{}:{}", node_id, ip));
        Ok(())
    }

    async fn detach_floating_ip(&self, node_id: &str, floating_ip_id: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let fip = s
            .floating_ips
            .iter_mut()
            .find(|f| f.id == floating_ip_id)
            .ok_or_else(|| not_found("floating IP", floating_ip_id))?;
        fip.node_id = None;
        let ip = fip.ip_address.clone();
        if let Some(node) = s.nodes.get_mut(node_id) {
            node.public_ips.retain(|p| p != &ip);
        }
        s.calls.push(format!("detach_floating_ip:{}:{}", node_id, ip));
        Ok(())
    }

    async fn delete_floating_ip(&self, id: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let fip = s
            .floating_ips
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| not_found("floating IP", id))?;
        s.floating_ips.retain(|f| f.id != id);
        s.calls.push(format!("delete_floating_ip:{}", fip.ip_address));
        Ok(())
    }

    async fn compute_quotas(&self) -> Result<BTreeMap<String, ProviderQuota>> {
        self.state
            .lock()
            .unwrap()
            .compute_quotas
            .clone()
            .ok_or_else(|| OpenStackError::Api("compute quotas unavailable".into()))
    }

    async fn network_quotas(&self) -> Result<BTreeMap<String, ProviderQuota>> {
        self.state
            .lock()
            .unwrap()
            .network_quotas
            .clone()
            .ok_or_else(|| OpenStackError::Api("network quotas unavailable".into()))
    }

    async fn volume_quotas(&self) -> Result<BTreeMap<String, ProviderQuota>> {
        self.state
            .lock()
            .unwrap()
            .volume_quotas
            .clone()
            .ok_or_else(|| OpenStackError::Api("volume quotas unavailable".into()))
    }
}

/// Hands out the fake cloud, counting authentications
pub struct FakeFactory {
    pub cloud: Arc<FakeCloud>,
    pub connects: AtomicU32,
    pub params: Mutex<Vec<AuthParams>>,
}

impl FakeFactory {
    pub fn new(cloud: Arc<FakeCloud>) -> Arc<Self> {
        Arc::new(Self {
            cloud,
            connects: AtomicU32::new(0),
            params: Mutex::new(Vec::new()),
        })
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriverFactory for FakeFactory {
    async fn connect(&self, params: &AuthParams) -> Result<Arc<dyn OpenStackApi>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.params.lock().unwrap().push(params.clone());
        Ok(self.cloud.clone())
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    pub slept: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

#[derive(Default)]
pub struct RecordingDns {
    pub registered: Mutex<Vec<DnsRegistration>>,
    pub deregistered: Mutex<Vec<DnsRegistration>>,
}

#[async_trait]
impl DnsUpdater for RecordingDns {
    async fn register(&self, entry: &DnsRegistration) -> cirrus_cloud::Result<()> {
        self.registered.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn deregister(&self, entry: &DnsRegistration) -> cirrus_cloud::Result<()> {
        self.deregistered.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

pub fn site() -> CloudSite {
    CloudSite::new("ost", "OpenStack", "ost", "https://server.com:5000")
}

pub fn credentials() -> Vec<Credential> {
    vec![
        Credential::new("im", "InfrastructureManager"),
        Credential {
            username: Some("user".into()),
            password: Some("pass".into()),
            tenant: Some("tenant".into()),
            host: Some("https://server.com:5000".into()),
            ..Credential::new("ost", "OpenStack")
        },
    ]
}

pub struct Harness {
    pub cloud: Arc<FakeCloud>,
    pub factory: Arc<FakeFactory>,
    pub dns: Arc<RecordingDns>,
    pub sleeper: Arc<RecordingSleeper>,
    pub connector: OpenStackConnector,
}

impl Harness {
    pub fn new(cloud: Arc<FakeCloud>) -> Self {
        let factory = FakeFactory::new(cloud.clone());
        let dns = Arc::new(RecordingDns::default());
        let sleeper = Arc::new(RecordingSleeper::default());
        let connector = OpenStackConnector::new(site(), factory.clone())
            .with_dns_updater(dns.clone())
            .with_sleeper(sleeper.clone());
        Self {
            cloud,
            factory,
            dns,
            sleeper,
            connector,
        }
    }

    pub fn standard() -> Self {
        Self::new(FakeCloud::standard())
    }
}
