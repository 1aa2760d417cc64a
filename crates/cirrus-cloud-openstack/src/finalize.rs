//! Release of everything a VM owns

use crate::api::{NodeState, OpenStackApi};
use crate::error::OpenStackError;
use crate::lifecycle::store;
use crate::network::{self, group_plan};
use crate::provider::OpenStackConnector;
use crate::volumes;
use cirrus_cloud::{CleanupReport, Credential, Infrastructure, Result, VirtualMachine, VmState};
use std::collections::HashSet;

impl OpenStackConnector {
    /// Releases the resources of `vm_id` in dependency order
    ///
    /// 1. owned floating IPs
    /// 2. the node
    /// 3. owned volumes
    /// 4. security groups, the node's own group first
    /// 5. created networks nothing else uses
    /// 6. DNS registrations
    /// 7. auto-delete snapshots, with the last live VM
    ///
    /// Every step runs even when an earlier one failed. Resources already
    /// gone count as released. Only failing to authenticate is an error.
    pub(crate) async fn finalize_vm(
        &self,
        infra: &mut Infrastructure,
        vm_id: &str,
        delete_image: bool,
        credentials: &[Credential],
    ) -> Result<CleanupReport> {
        let start = std::time::Instant::now();
        let api = self.get_driver(credentials).await?;
        let api = api.as_ref();
        let mut report = CleanupReport::new();

        let Some(mut vm) = infra.vm(vm_id).cloned() else {
            report.add_success(format!("node:{}", vm_id), "already gone");
            return Ok(report);
        };
        tracing::info!(node = %vm.id, infra = %infra.id, "Finalizing VM");

        let mut kept = Vec::new();
        for ip in std::mem::take(&mut vm.floating_ips) {
            let released = network::release_floating_ip(api, &vm.id, &ip, true).await;
            if !report.record(format!("floating_ip:{}", ip), released) {
                kept.push(ip);
            }
        }
        vm.floating_ips = kept;

        let destroyed = self.destroy_node(api, &vm.id).await;
        let node_gone = report.record(format!("node:{}", vm.id), destroyed);

        let mut kept = Vec::new();
        for volume_id in std::mem::take(&mut vm.volumes) {
            let released = volumes::release_volume(api, &self.pacing, &volume_id).await;
            if !report.record(format!("volume:{}", volume_id), released) {
                kept.push(volume_id);
            }
        }
        vm.volumes = kept;

        self.release_security_groups(api, infra, &vm, &mut report)
            .await;

        for binding in infra.networks.clone() {
            if !binding.created || infra.network_in_use(&binding.network, &vm.id) {
                continue;
            }
            let released = network::release_network(api, &self.pacing, &binding).await;
            if report.record(format!("network:{}", binding.network), released) {
                infra.remove_binding(&binding.network);
            }
        }

        let mut kept = Vec::new();
        for entry in std::mem::take(&mut vm.dns_entries) {
            let released = self.dns.deregister(&entry).await;
            if !report.record(format!("dns:{}", entry.hostname), released) {
                kept.push(entry);
            }
        }
        vm.dns_entries = kept;

        let last_vm = !infra.live_vms().any(|other| other.id != vm.id);
        if delete_image && last_vm {
            let mut kept = Vec::new();
            for uri in std::mem::take(&mut infra.snapshots) {
                let removed = self.remove_image(api, &uri).await;
                if !report.record(format!("image:{}", uri), removed) {
                    kept.push(uri);
                }
            }
            infra.snapshots = kept;
        }

        if node_gone {
            vm.set_state(VmState::Terminated);
        }
        store(infra, vm);

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(node = %vm_id, "{}", report.summary());
        Ok(report)
    }

    /// Destroys the node and waits until the provider no longer lists it
    async fn destroy_node(&self, api: &dyn OpenStackApi, node_id: &str) -> Result<()> {
        self.pacing
            .retry("destroy_node", || async { Ok(api.destroy_node(node_id).await?) })
            .await?;

        self.pacing
            .poll(&format!("deletion of node {}", node_id), || async {
                match api.get_node(node_id).await {
                    Ok(node) => Ok((node.state == NodeState::Terminated).then_some(())),
                    Err(OpenStackError::NotFound(_)) => Ok(Some(())),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    /// Removes the node from its groups and deletes the groups the connector
    /// created that no other live VM needs, in reverse creation order
    async fn release_security_groups(
        &self,
        api: &dyn OpenStackApi,
        infra: &Infrastructure,
        vm: &VirtualMachine,
        report: &mut CleanupReport,
    ) {
        let settings = &self.settings.network;
        let plan = group_plan(settings, infra, &vm.name, &vm.requested);

        let in_use: HashSet<String> = infra
            .live_vms()
            .filter(|other| other.id != vm.id)
            .flat_map(|other| group_plan(settings, infra, &other.name, &other.requested))
            .map(|group| group.name)
            .collect();

        let existing = match api.list_security_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                report.add_failure("security_groups", e);
                return;
            }
        };

        for group in plan.iter().rev() {
            let removed: Result<()> = api
                .remove_security_group_from_node(&vm.id, &group.name)
                .await
                .map_err(Into::into);
            report.record(format!("security_group_member:{}", group.name), removed);

            if in_use.contains(&group.name) {
                continue;
            }
            let Some(owned) = existing
                .iter()
                .find(|g| g.name == group.name && g.description == settings.security_group_description)
            else {
                continue;
            };

            let deleted = self
                .pacing
                .retry_conflicts("delete_security_group", || api.delete_security_group(&owned.id))
                .await;
            report.record(format!("security_group:{}", group.name), deleted);
        }
    }
}
