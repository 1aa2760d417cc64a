//! Launch, refresh and power control of nodes

use crate::addresses::{InterfaceTarget, is_private_ip, map_addresses};
use crate::api::{BlockDeviceMapping, CreateNodeRequest, Node, NodeState, OpenStackApi};
use crate::error::OpenStackError;
use crate::flavors::{accelerators_from_specs, list_flavor_details, select_instance_types};
use crate::network;
use crate::provider::OpenStackConnector;
use crate::volumes;
use cirrus_cloud::dns::parse_update_name;
use cirrus_cloud::{
    CloudError, ConcreteSystem, Credential, ImageUri, Infrastructure, Result, System,
    VirtualMachine, VmState,
};

pub(crate) fn vm_state(state: NodeState) -> VmState {
    match state {
        NodeState::Pending => VmState::Pending,
        NodeState::Running => VmState::Running,
        NodeState::Stopped => VmState::Stopped,
        NodeState::Rebooting => VmState::Rebooting,
        NodeState::Terminated => VmState::Terminated,
        NodeState::Error => VmState::Failed,
        NodeState::Unknown => VmState::Unknown,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Stop,
    Start,
    Reboot,
}

/// Whether the node has an externally routable IPv4 address
fn has_public_v4(node: &Node) -> bool {
    let listed = node.public_ips.iter();
    let mapped = node
        .addresses
        .iter()
        .flat_map(|map| map.values().flatten())
        .map(|a| &a.addr);
    listed
        .chain(mapped)
        .any(|ip| ip.parse::<std::net::Ipv4Addr>().is_ok() && !is_private_ip(ip))
}

impl OpenStackConnector {
    /// Instance types for `system`
    ///
    /// With `check_image`, a boot image owned by another site yields no
    /// candidates.
    pub(crate) async fn instance_types(
        &self,
        api: &dyn OpenStackApi,
        system: &System,
        check_image: bool,
    ) -> Result<Vec<ConcreteSystem>> {
        if check_image {
            if let Some(url) = system.boot_disk().and_then(|d| d.image_url.as_deref()) {
                let own = url
                    .parse::<ImageUri>()
                    .map(|uri| uri.belongs_to(&self.site))
                    .unwrap_or(false);
                if !own {
                    tracing::debug!(image = %url, site = %self.site.id, "Image of another site");
                    return Ok(Vec::new());
                }
            }
        }

        let catalog = list_flavor_details(api).await?;
        Ok(select_instance_types(system, &catalog))
    }

    pub(crate) async fn launch_nodes(
        &self,
        infra: &mut Infrastructure,
        system: &System,
        count: usize,
        credentials: &[Credential],
    ) -> Result<Vec<Result<VirtualMachine>>> {
        let api = self.get_driver(credentials).await?;
        let api = api.as_ref();

        let concrete = self
            .instance_types(api, system, true)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CloudError::ConstraintUnsatisfiable(system.name.clone()))?;
        let block_devices = volumes::block_device_mappings(api, &self.site, system).await?;
        let networks =
            network::resolve_networks(api, &self.settings.network, infra, system).await?;

        tracing::info!(
            system = %system.name,
            instance_type = %concrete.instance_type,
            count = count,
            "Launching nodes"
        );

        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            let name = format!("{}-{}-{}", system.name, infra.id, infra.vms.len());
            match self
                .launch_node(api, infra, system, &concrete, &name, &networks, &block_devices)
                .await
            {
                Ok(vm) => {
                    tracing::info!(node = %vm.id, name = %vm.name, "Node created");
                    infra.add_vm(vm.clone());
                    results.push(Ok(vm));
                }
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Error launching node");
                    results.push(Err(e));
                }
            }
        }

        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    async fn launch_node(
        &self,
        api: &dyn OpenStackApi,
        infra: &Infrastructure,
        system: &System,
        concrete: &ConcreteSystem,
        name: &str,
        networks: &[String],
        block_devices: &[BlockDeviceMapping],
    ) -> Result<VirtualMachine> {
        let plan = network::group_plan(&self.settings.network, infra, name, system);
        let security_groups =
            network::ensure_security_groups(api, &self.settings.network, &plan).await?;

        let request = CreateNodeRequest {
            name: name.to_string(),
            flavor_id: concrete.instance_type_id.clone(),
            networks: networks.to_vec(),
            security_groups,
            block_devices: block_devices.to_vec(),
            user_data: system.user_data.clone(),
            metadata: system.instance_tags.clone(),
        };

        let node = match self
            .pacing
            .retry("create_node", || async { Ok(api.create_node(&request).await?) })
            .await
        {
            Ok(node) => node,
            Err(e) => {
                self.drop_node_group(api, name).await;
                return Err(e);
            }
        };

        let mut vm = VirtualMachine::new(&node.id, &node.name, &infra.id, &self.site.id, system.clone());
        vm.current = concrete.system.clone();
        vm.set_state(vm_state(node.state));
        Ok(vm)
    }

    /// Deletes the group made for a node that never came up
    async fn drop_node_group(&self, api: &dyn OpenStackApi, name: &str) {
        let groups = match api.list_security_groups().await {
            Ok(groups) => groups,
            Err(_) => return,
        };
        let owned = groups.iter().find(|g| {
            g.name == name && g.description == self.settings.network.security_group_description
        });
        if let Some(group) = owned {
            if let Err(e) = api.delete_security_group(&group.id).await {
                tracing::warn!(group = %name, error = %e, "Could not delete security group");
            }
        }
    }

    pub(crate) async fn refresh_vm(
        &self,
        infra: &mut Infrastructure,
        vm_id: &str,
        credentials: &[Credential],
    ) -> Result<()> {
        let api = self.get_driver(credentials).await?;
        let api = api.as_ref();
        let mut vm = infra
            .vm(vm_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("VM {}", vm_id)))?;

        let outcome = self.sync_vm(api, infra, &mut vm).await;
        vm.touch();
        store(infra, vm);

        if !outcome? {
            return Ok(());
        }
        network::reconcile_host_routes(api, infra).await
    }

    /// Applies the node's provider state to `vm`; false when the node is gone
    ///
    /// Floating IPs attached here are pushed onto `vm` before any later
    /// step can fail.
    async fn sync_vm(
        &self,
        api: &dyn OpenStackApi,
        infra: &Infrastructure,
        vm: &mut VirtualMachine,
    ) -> Result<bool> {
        let node = match api.get_node(&vm.id).await {
            Ok(node) => node,
            Err(OpenStackError::NotFound(_)) => {
                tracing::warn!(node = %vm.id, "Node not found, marking VM terminated");
                vm.set_state(VmState::Terminated);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        vm.set_state(vm_state(node.state));

        self.refresh_flavor(api, &node, &mut vm.current).await?;

        let floating = if node.state == NodeState::Running {
            self.attach_missing_floating_ip(api, infra, &node, vm).await?
        } else {
            Vec::new()
        };

        self.map_interfaces(infra, &node, &floating, vm);
        volumes::reconcile_attached_volumes(api, &self.site, &node, &mut vm.current).await?;
        self.update_dns(vm).await;
        Ok(true)
    }

    async fn refresh_flavor(&self, api: &dyn OpenStackApi, node: &Node, current: &mut System) -> Result<()> {
        let flavor = api.get_flavor(&node.flavor_id).await?;
        current.instance_type = Some(flavor.name.clone());
        current.cpu_count = Some(flavor.vcpus);
        current.memory_mb = Some(flavor.ram_mb);
        current.price = Some(flavor.price);

        match api.flavor_extra_specs(&flavor.id).await {
            Ok(specs) => {
                let accelerators = accelerators_from_specs(&specs);
                if accelerators.count.is_some() {
                    current.accelerators = accelerators;
                }
            }
            Err(e) => tracing::debug!(flavor = %flavor.name, error = %e, "No extra specs"),
        }
        Ok(())
    }

    /// Gives the first outbound interface a floating IP when the node has no
    /// public address yet; returns the addresses attached
    async fn attach_missing_floating_ip(
        &self,
        api: &dyn OpenStackApi,
        infra: &Infrastructure,
        node: &Node,
        vm: &mut VirtualMachine,
    ) -> Result<Vec<String>> {
        if has_public_v4(node) {
            return Ok(Vec::new());
        }

        for iface in &vm.requested.interfaces {
            let declared = network::declared_network(infra, &iface.connection);
            if !declared.outbound {
                continue;
            }
            if infra.binding(&declared.id).is_some_and(|b| b.external) {
                continue;
            }

            let requested = iface.ip.as_deref().filter(|ip| !is_private_ip(ip));
            let pool = network::floating_pool(api, &declared).await?;
            let attached = network::attach_floating_ip(api, &node.id, &pool, requested).await?;

            if attached.owned && !vm.floating_ips.contains(&attached.ip) {
                vm.floating_ips.push(attached.ip.clone());
            }
            return Ok(vec![attached.ip]);
        }

        Ok(Vec::new())
    }

    fn map_interfaces(
        &self,
        infra: &Infrastructure,
        node: &Node,
        floating: &[String],
        vm: &mut VirtualMachine,
    ) {
        let targets: Vec<InterfaceTarget> = vm
            .requested
            .interfaces
            .iter()
            .map(|iface| {
                let declared = network::declared_network(infra, &iface.connection);
                InterfaceTarget {
                    index: iface.index,
                    public: declared.outbound,
                    provider_network: infra
                        .binding(&declared.id)
                        .map(|b| b.provider_network_name.clone())
                        .or(declared.provider_id),
                }
            })
            .collect();

        let observed = map_addresses(node, &targets, floating);

        for requested in &vm.requested.interfaces {
            let current = vm.current.interface_mut(requested.index);
            current.connection = requested.connection.clone();
            current.dns_name = requested.dns_name.clone();
            if let Some(addresses) = observed.get(&requested.index) {
                if addresses.ip.is_some() {
                    current.ip = addresses.ip.clone();
                }
                if addresses.ipv6.is_some() {
                    current.ipv6 = addresses.ipv6.clone();
                }
            }
        }
    }

    /// Registers dynamic DNS names whose address changed
    ///
    /// A failed update is logged and retried on the next refresh.
    async fn update_dns(&self, vm: &mut VirtualMachine) {
        let wanted: Vec<_> = vm
            .current
            .interfaces
            .iter()
            .filter_map(|iface| {
                let dns_name = iface.dns_name.as_deref()?;
                parse_update_name(dns_name, iface.ip.as_deref()?)
            })
            .collect();

        for entry in wanted {
            let registered = vm
                .dns_entries
                .iter()
                .any(|e| e.hostname == entry.hostname && e.ip == entry.ip);
            if registered {
                continue;
            }

            match self.dns.register(&entry).await {
                Ok(()) => {
                    tracing::info!(hostname = %entry.hostname, ip = %entry.ip, "DNS entry registered");
                    vm.dns_entries.retain(|e| e.hostname != entry.hostname);
                    vm.dns_entries.push(entry);
                }
                Err(e) => {
                    tracing::warn!(hostname = %entry.hostname, error = %e, "Error registering DNS entry")
                }
            }
        }
    }

    /// Idempotent power control
    pub(crate) async fn power(
        &self,
        vm: &mut VirtualMachine,
        action: PowerAction,
        credentials: &[Credential],
    ) -> Result<()> {
        let api = self.get_driver(credentials).await?;
        let node = api.get_node(&vm.id).await?;

        let state = match (action, node.state) {
            (PowerAction::Stop, NodeState::Stopped) => VmState::Stopped,
            (PowerAction::Stop, _) => {
                api.stop_node(&vm.id).await?;
                VmState::Stopped
            }
            (PowerAction::Start, NodeState::Running) => VmState::Running,
            (PowerAction::Start, _) => {
                api.start_node(&vm.id).await?;
                VmState::Running
            }
            (PowerAction::Reboot, NodeState::Running) => {
                api.reboot_node(&vm.id).await?;
                VmState::Running
            }
            (PowerAction::Reboot, _) => {
                api.start_node(&vm.id).await?;
                VmState::Running
            }
        };

        tracing::info!(node = %vm.id, action = ?action, "Power action done");
        vm.set_state(state);
        Ok(())
    }
}

/// Writes `vm` back into `infra`
pub(crate) fn store(infra: &mut Infrastructure, vm: VirtualMachine) {
    match infra.vm_mut(&vm.id) {
        Some(slot) => *slot = vm,
        None => infra.add_vm(vm),
    }
}
