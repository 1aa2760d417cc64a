//! Network reconciliation
//!
//! Resolves declared networks to provider networks (creating them when
//! asked to), and manages the resources that hang off them: routers,
//! security groups, floating IPs and subnet host routes.

use crate::api::{self, HostRoute, OpenStackApi, SecurityGroupRule, Subnet};
use crate::error::OpenStackError;
use crate::provider::Pacing;
use cirrus_cloud::{
    CloudError, Infrastructure, Network, NetworkBinding, Protocol, Result, System,
    cidr_wildcard_iterator,
};
use cirrus_config::NetworkSettings;
use std::collections::HashSet;

const ANY_CIDR: &str = "0.0.0.0/0";

/// The declared network `connection` refers to; undeclared ones are private
pub fn declared_network(infra: &Infrastructure, connection: &str) -> Network {
    infra
        .spec
        .network(connection)
        .cloned()
        .unwrap_or_else(|| Network::new(connection))
}

/// `<prefix>-<infra>-<network>`
pub fn resource_name(settings: &NetworkSettings, infra_id: &str, network_id: &str) -> String {
    format!("{}-{}-{}", settings.resource_prefix, infra_id, network_id)
}

fn find_network<'a>(networks: &'a [api::Network], key: &str) -> Option<&'a api::Network> {
    networks.iter().find(|n| n.name == key || n.id == key)
}

fn first_private(networks: &[api::Network]) -> Option<&api::Network> {
    networks.iter().find(|n| !n.external)
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

fn existing_binding(declared: &str, network: &api::Network, subnets: &[Subnet]) -> NetworkBinding {
    let subnet = network
        .subnets
        .first()
        .and_then(|id| subnets.iter().find(|s| &s.id == id))
        .or_else(|| subnets.iter().find(|s| s.network_id == network.id));

    NetworkBinding {
        network: declared.to_string(),
        provider_network_id: network.id.clone(),
        provider_network_name: network.name.clone(),
        subnet_id: subnet.map(|s| s.id.clone()),
        cidr: network.cidr.clone().or_else(|| subnet.map(|s| s.cidr.clone())),
        external: network.external,
        created: false,
        router_id: None,
    }
}

/// Resolves the provider networks the nodes of `system` connect to
///
/// Returns provider network ids in interface order. Bindings are recorded
/// on `infra`. Outbound connections without a provider network of their own
/// are served by floating IPs later and add no id here.
pub async fn resolve_networks(
    api: &dyn OpenStackApi,
    settings: &NetworkSettings,
    infra: &mut Infrastructure,
    system: &System,
) -> Result<Vec<String>> {
    let networks = api.list_networks().await?;
    let subnets = api.list_subnets().await?;
    let external = networks.iter().find(|n| n.external);
    let mut ids = Vec::new();

    for iface in &system.interfaces {
        let declared = declared_network(infra, &iface.connection);

        if let Some(existing) = declared
            .provider_id
            .as_deref()
            .and_then(|key| find_network(&networks, key))
        {
            push_unique(&mut ids, &existing.id);
            infra.set_binding(existing_binding(&declared.id, existing, &subnets));
            continue;
        }

        if declared.outbound {
            continue;
        }

        if let Some(binding) = infra.binding(&declared.id) {
            push_unique(&mut ids, &binding.provider_network_id);
            continue;
        }

        if declared.create {
            let binding =
                create_network(api, settings, &infra.id, &declared, external, &subnets).await?;
            push_unique(&mut ids, &binding.provider_network_id);
            infra.set_binding(binding);
            continue;
        }

        match first_private(&networks) {
            Some(network) => {
                push_unique(&mut ids, &network.id);
                infra.set_binding(existing_binding(&declared.id, network, &subnets));
            }
            None => tracing::warn!(network = %declared.id, "No provider network available"),
        }
    }

    if ids.is_empty() {
        if let Some(network) = first_private(&networks) {
            ids.push(network.id.clone());
        }
    }

    Ok(ids)
}

/// Creates the network and subnet of `declared`, attaching the subnet to
/// the router of `external` when there is one
pub async fn create_network(
    api: &dyn OpenStackApi,
    settings: &NetworkSettings,
    infra_id: &str,
    declared: &Network,
    external: Option<&api::Network>,
    subnets: &[Subnet],
) -> Result<NetworkBinding> {
    let name = resource_name(settings, infra_id, &declared.id);
    let used: HashSet<String> = subnets.iter().map(|s| s.cidr.clone()).collect();
    let pattern = declared.cidr.as_deref().unwrap_or(&settings.default_cidr);
    let cidr = cidr_wildcard_iterator(pattern)?
        .first_free(&used)
        .ok_or_else(|| CloudError::InvalidConfig(format!("no free CIDR left in {}", pattern)))?;

    let network = api.create_network(&name).await?;
    tracing::info!(network = %name, cidr = %cidr, "Network created");

    let subnet = match api
        .create_subnet(&network.id, &name, &cidr, &declared.dns_servers)
        .await
    {
        Ok(subnet) => subnet,
        Err(e) => {
            delete_quietly(api, &network.id).await;
            return Err(e.into());
        }
    };

    let router_id = match external {
        Some(external) => match attach_router(api, settings, infra_id, external, &subnet.id).await {
            Ok(router_id) => Some(router_id),
            Err(e) => {
                delete_quietly(api, &network.id).await;
                return Err(e);
            }
        },
        None => None,
    };

    Ok(NetworkBinding {
        network: declared.id.clone(),
        provider_network_id: network.id,
        provider_network_name: network.name,
        subnet_id: Some(subnet.id),
        cidr: Some(cidr),
        external: false,
        created: true,
        router_id,
    })
}

async fn delete_quietly(api: &dyn OpenStackApi, network_id: &str) {
    if let Err(e) = api.delete_network(network_id).await {
        tracing::warn!(network = %network_id, error = %e, "Could not delete network");
    }
}

/// Attaches `subnet_id` to the router gatewayed on `external`, creating the
/// router when none exists
async fn attach_router(
    api: &dyn OpenStackApi,
    settings: &NetworkSettings,
    infra_id: &str,
    external: &api::Network,
    subnet_id: &str,
) -> Result<String> {
    let routers = api.list_routers().await?;
    let router = match routers
        .into_iter()
        .find(|r| r.external_gateway.as_deref() == Some(external.id.as_str()))
    {
        Some(router) => router,
        None => {
            let name = format!("{}-{}", settings.resource_prefix, infra_id);
            tracing::info!(router = %name, "Creating router");
            api.create_router(&name, &external.id, &settings.router_description)
                .await?
        }
    };

    api.add_router_subnet(&router.id, subnet_id).await?;
    Ok(router.id)
}

/// Detaches a created network from its router and deletes it
pub async fn release_network(
    api: &dyn OpenStackApi,
    pacing: &Pacing,
    binding: &NetworkBinding,
) -> Result<()> {
    if let (Some(router_id), Some(subnet_id)) = (&binding.router_id, &binding.subnet_id) {
        match api.remove_router_subnet(router_id, subnet_id).await {
            Ok(()) | Err(OpenStackError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    pacing
        .retry_conflicts("delete_network", || {
            api.delete_network(&binding.provider_network_id)
        })
        .await
}

/// A security group the connector manages for a node
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPlan {
    pub name: String,
    pub rules: Vec<SecurityGroupRule>,
}

fn ssh_rule() -> SecurityGroupRule {
    SecurityGroupRule::new(Protocol::Tcp, 22, 22, ANY_CIDR)
}

/// Security groups of a node named `node_name`, in creation order
///
/// Groups of private networks come first, then those of public networks,
/// and last the group of the node itself with the SSH rule.
pub fn group_plan(
    settings: &NetworkSettings,
    infra: &Infrastructure,
    node_name: &str,
    system: &System,
) -> Vec<GroupPlan> {
    let mut seen = HashSet::new();
    let declared: Vec<Network> = system
        .interfaces
        .iter()
        .filter(|iface| seen.insert(iface.connection.clone()))
        .map(|iface| declared_network(infra, &iface.connection))
        .collect();

    let (public, private): (Vec<&Network>, Vec<&Network>) =
        declared.iter().partition(|n| n.outbound);

    let mut plan = Vec::new();
    for network in private.into_iter().chain(public) {
        let name = network
            .sg_name
            .clone()
            .unwrap_or_else(|| resource_name(settings, &infra.id, &network.id));

        let rules = if network.outbound {
            network
                .outports
                .iter()
                .map(|p| SecurityGroupRule::new(p.protocol, p.from, p.to, p.remote_cidr.clone()))
                .collect()
        } else {
            let cidr = infra
                .binding(&network.id)
                .and_then(|b| b.cidr.clone())
                .or_else(|| network.cidr.clone().filter(|c| !c.contains('*')));
            match cidr {
                Some(cidr) => vec![
                    SecurityGroupRule::new(Protocol::Tcp, 1, 65535, cidr.clone()),
                    SecurityGroupRule::new(Protocol::Udp, 1, 65535, cidr),
                ],
                None => Vec::new(),
            }
        };

        plan.push(GroupPlan { name, rules });
    }

    plan.push(GroupPlan {
        name: node_name.to_string(),
        rules: vec![ssh_rule()],
    });
    plan
}

/// Makes sure every planned group exists; existing groups are reused as is
pub async fn ensure_security_groups(
    api: &dyn OpenStackApi,
    settings: &NetworkSettings,
    plan: &[GroupPlan],
) -> Result<Vec<String>> {
    let existing = api.list_security_groups().await?;
    let mut names = Vec::with_capacity(plan.len());

    for group in plan {
        if !existing.iter().any(|g| g.name == group.name) {
            let created = api
                .create_security_group(&group.name, &settings.security_group_description)
                .await?;
            tracing::info!(group = %group.name, "Security group created");
            for rule in &group.rules {
                api.create_security_group_rule(&created.id, rule).await?;
            }
        }
        names.push(group.name.clone());
    }

    Ok(names)
}

/// Floating IP pool serving an outbound network
///
/// The pool named by `provider_id` when it exists, else the first one.
pub async fn floating_pool(api: &dyn OpenStackApi, declared: &Network) -> Result<String> {
    let pools = api.list_floating_ip_pools().await?;
    if let Some(wanted) = declared.provider_id.as_deref() {
        if pools.iter().any(|p| p == wanted) {
            return Ok(wanted.to_string());
        }
    }
    pools
        .into_iter()
        .next()
        .ok_or_else(|| CloudError::ApiError("no floating IP pool available".into()))
}

/// A floating IP attached to a node
#[derive(Debug, Clone, PartialEq)]
pub struct AttachedFloatingIp {
    pub ip: String,
    /// Allocated or taken for the node, as opposed to requested explicitly
    pub owned: bool,
}

/// Attaches a floating IP from `pool` to `node_id`
///
/// A `requested` address is looked up and attached without being owned.
/// Otherwise an unassigned address of the pool is reused before a new one
/// is allocated.
pub async fn attach_floating_ip(
    api: &dyn OpenStackApi,
    node_id: &str,
    pool: &str,
    requested: Option<&str>,
) -> Result<AttachedFloatingIp> {
    let floating_ips = api.list_floating_ips().await?;

    if let Some(ip) = requested {
        let fip = floating_ips
            .iter()
            .find(|f| f.ip_address == ip)
            .ok_or_else(|| CloudError::NotFound(format!("floating IP {}", ip)))?;
        if fip.node_id.as_deref() != Some(node_id) {
            api.attach_floating_ip(node_id, &fip.id).await?;
        }
        return Ok(AttachedFloatingIp {
            ip: ip.to_string(),
            owned: false,
        });
    }

    let (fip, allocated) = match floating_ips
        .into_iter()
        .find(|f| f.pool == pool && f.node_id.is_none())
    {
        Some(fip) => (fip, false),
        None => (api.create_floating_ip(pool).await?, true),
    };

    if let Err(e) = api.attach_floating_ip(node_id, &fip.id).await {
        if allocated {
            if let Err(cleanup) = api.delete_floating_ip(&fip.id).await {
                tracing::warn!(ip = %fip.ip_address, error = %cleanup, "Could not release floating IP");
            }
        }
        return Err(e.into());
    }

    tracing::info!(node = %node_id, ip = %fip.ip_address, "Floating IP attached");
    Ok(AttachedFloatingIp {
        ip: fip.ip_address,
        owned: true,
    })
}

/// Detaches the floating IP `ip` from `node_id`, deleting it when `delete`
pub async fn release_floating_ip(
    api: &dyn OpenStackApi,
    node_id: &str,
    ip: &str,
    delete: bool,
) -> Result<()> {
    let floating_ips = api.list_floating_ips().await?;
    let fip = floating_ips
        .iter()
        .find(|f| f.ip_address == ip)
        .ok_or_else(|| CloudError::NotFound(format!("floating IP {}", ip)))?;

    if fip.node_id.is_some() {
        match api.detach_floating_ip(node_id, &fip.id).await {
            Ok(()) | Err(OpenStackError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    if delete {
        api.delete_floating_ip(&fip.id).await?;
    }
    Ok(())
}

/// Points the host routes of router-served networks at the router VM
///
/// A network declaring `router = '<destination>,<system>'` gets a route to
/// the destination through the current address of that system's VM on the
/// network. Routes already in place are left untouched.
pub async fn reconcile_host_routes(api: &dyn OpenStackApi, infra: &Infrastructure) -> Result<()> {
    let mut subnets: Option<Vec<Subnet>> = None;

    for declared in &infra.spec.networks {
        let Some(target) = &declared.router else {
            continue;
        };
        let Some(subnet_id) = infra.binding(&declared.id).and_then(|b| b.subnet_id.clone()) else {
            continue;
        };
        let Some(nexthop) = infra
            .live_vms()
            .find(|vm| vm.requested.name == target.system)
            .and_then(|vm| vm.iface_ip(&declared.id))
        else {
            continue;
        };

        if subnets.is_none() {
            subnets = Some(api.list_subnets().await?);
        }
        let Some(subnet) = subnets
            .as_ref()
            .and_then(|all| all.iter().find(|s| s.id == subnet_id))
        else {
            continue;
        };

        let route = HostRoute {
            destination: target.destination.clone(),
            nexthop: nexthop.to_string(),
        };
        if subnet.host_routes.contains(&route) {
            continue;
        }

        let mut routes: Vec<HostRoute> = subnet
            .host_routes
            .iter()
            .filter(|r| r.destination != route.destination)
            .cloned()
            .collect();
        routes.push(route);

        tracing::info!(subnet = %subnet_id, destination = %target.destination, nexthop = %nexthop, "Updating host routes");
        api.update_subnet_routes(&subnet_id, &routes).await?;
    }

    Ok(())
}
