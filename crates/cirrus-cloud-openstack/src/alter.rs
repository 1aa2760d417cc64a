//! Changes applied to running nodes

use crate::addresses::is_private_ip;
use crate::api::OpenStackApi;
use crate::lifecycle::store;
use crate::network;
use crate::provider::OpenStackConnector;
use crate::volumes;
use cirrus_cloud::{
    CloudError, Credential, ImageUri, Infrastructure, InfrastructureSpec, Result, System,
    VirtualMachine,
};

const RESIZED: &str = "resized";

impl OpenStackConnector {
    pub(crate) async fn alter(
        &self,
        infra: &mut Infrastructure,
        vm_id: &str,
        delta: &InfrastructureSpec,
        credentials: &[Credential],
    ) -> Result<()> {
        let api = self.get_driver(credentials).await?;
        let api = api.as_ref();
        let mut vm = infra
            .vm(vm_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("VM {}", vm_id)))?;

        for network in &delta.networks {
            infra.spec.add_network(network.clone());
        }

        let Some(changes) = delta.systems.first() else {
            return Ok(());
        };

        // volumes and floating IPs acquired before a failure stay recorded
        let outcome = self.apply_changes(api, infra, &mut vm, changes).await;
        vm.touch();
        store(infra, vm);
        outcome
    }

    async fn apply_changes(
        &self,
        api: &dyn OpenStackApi,
        infra: &Infrastructure,
        vm: &mut VirtualMachine,
        changes: &System,
    ) -> Result<()> {
        if vm.current.has_resource_changes(changes) {
            self.resize(api, vm, changes).await?;
        }
        self.alter_disks(api, vm, changes).await?;
        self.alter_interfaces(api, infra, vm, changes).await
    }

    /// Moves the node to the instance type matching the new constraints
    async fn resize(&self, api: &dyn OpenStackApi, vm: &mut VirtualMachine, changes: &System) -> Result<()> {
        let mut wanted = vm.requested.clone();
        wanted.merge_resources(changes);

        let concrete = self
            .instance_types(api, &wanted, false)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CloudError::ConstraintUnsatisfiable(wanted.name.clone()))?;

        let node = api.get_node(&vm.id).await?;
        if node.flavor_id != concrete.instance_type_id {
            tracing::info!(node = %vm.id, instance_type = %concrete.instance_type, "Resizing node");
            api.resize_node(&vm.id, &concrete.instance_type_id).await?;

            let node_id = vm.id.clone();
            self.pacing
                .poll(&format!("resize of {}", node_id), || async {
                    let node = api.get_node(&node_id).await?;
                    Ok((node.vm_state.as_deref() == Some(RESIZED)).then_some(()))
                })
                .await?;
            api.confirm_resize(&vm.id).await?;
        }

        vm.requested.merge_resources(changes);
        vm.current.instance_type = Some(concrete.instance_type);
        vm.current.cpu_count = Some(concrete.vcpus);
        vm.current.memory_mb = Some(concrete.ram_mb);
        vm.current.price = Some(concrete.price);
        if concrete.accelerators.is_requested() {
            vm.current.accelerators = concrete.accelerators;
        }
        Ok(())
    }

    /// Grows existing volumes and attaches new ones
    async fn alter_disks(&self, api: &dyn OpenStackApi, vm: &mut VirtualMachine, changes: &System) -> Result<()> {
        for disk in changes.disks.iter().filter(|d| d.index > 0) {
            let Some(size) = disk.size_gb else {
                continue;
            };

            let existing = vm
                .current
                .disk(disk.index)
                .and_then(|d| d.image_url.as_deref())
                .map(|url| ImageUri::parse_for(url, &self.site))
                .transpose()?;

            match existing {
                Some(volume) => {
                    let old = vm.current.disk(disk.index).and_then(|d| d.size_gb).unwrap_or(0);
                    if size > old {
                        tracing::info!(volume = %volume.id, size_gb = size, "Extending volume");
                        api.extend_volume(&volume.id, size).await?;
                        vm.current.disk_mut(disk.index).size_gb = Some(size);
                        vm.requested.disk_mut(disk.index).size_gb = Some(size);
                    }
                }
                None => {
                    let name = format!("{}-disk{}", vm.name, disk.index);
                    let (volume_id, device) = volumes::add_volume(
                        api,
                        &self.pacing,
                        &vm.id,
                        size,
                        &name,
                        disk.device.as_deref(),
                    )
                    .await?;
                    vm.volumes.push(volume_id.clone());

                    let mut requested = disk.clone();
                    requested.device = Some(device.clone());
                    vm.requested.set_disk(requested.clone());

                    requested.image_url = Some(ImageUri::for_site(&self.site, volume_id).to_string());
                    vm.current.set_disk(requested);
                    tracing::info!(node = %vm.id, device = %device, "Volume attached");
                }
            }
        }
        Ok(())
    }

    /// Applies connection changes, moving the node between public and
    /// private networks through its floating IPs
    async fn alter_interfaces(
        &self,
        api: &dyn OpenStackApi,
        infra: &Infrastructure,
        vm: &mut VirtualMachine,
        changes: &System,
    ) -> Result<()> {
        for iface in &changes.interfaces {
            let was_public = vm
                .requested
                .interface(iface.index)
                .map(|old| network::declared_network(infra, &old.connection).outbound)
                .unwrap_or(false);
            let declared = network::declared_network(infra, &iface.connection);

            let mut requested = iface.clone();
            match (was_public, declared.outbound) {
                (true, false) => {
                    self.detach_floating_ips(api, vm).await?;
                    requested.ip = None;
                    let current = vm.current.interface_mut(iface.index);
                    current.ip = None;
                    current.connection = iface.connection.clone();
                }
                (false, true) => {
                    let static_ip = iface.ip.as_deref().filter(|ip| !is_private_ip(ip));
                    let pool = network::floating_pool(api, &declared).await?;
                    let attached =
                        network::attach_floating_ip(api, &vm.id, &pool, static_ip).await?;
                    if attached.owned {
                        vm.floating_ips.push(attached.ip.clone());
                    }
                    let current = vm.current.interface_mut(iface.index);
                    current.ip = Some(attached.ip);
                    current.connection = iface.connection.clone();
                }
                _ => {
                    vm.current.interface_mut(iface.index).connection = iface.connection.clone();
                }
            }
            vm.requested.set_interface(requested);
        }
        Ok(())
    }

    /// Detaches every floating IP of the node, deleting the owned ones
    async fn detach_floating_ips(&self, api: &dyn OpenStackApi, vm: &mut VirtualMachine) -> Result<()> {
        let attached: Vec<String> = api
            .list_floating_ips()
            .await?
            .into_iter()
            .filter(|f| f.node_id.as_deref() == Some(vm.id.as_str()))
            .map(|f| f.ip_address)
            .collect();

        for ip in attached {
            let owned = vm.floating_ips.contains(&ip);
            network::release_floating_ip(api, &vm.id, &ip, owned).await?;
            vm.floating_ips.retain(|owned_ip| owned_ip != &ip);
            tracing::info!(node = %vm.id, ip = %ip, "Floating IP detached");
        }
        Ok(())
    }
}
