//! Mapping provider addresses back onto declared interfaces

use crate::api::{Node, NodeAddress};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

/// Whether `ip` is in a private, loopback, link-local or shared range
pub fn is_private_ip(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, ..] = v4.octets();
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                // 100.64.0.0/10 carrier grade NAT
                || (a == 100 && (64..128).contains(&b))
        }
        Ok(IpAddr::V6(v6)) => {
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}

fn is_v4(addr: &NodeAddress) -> bool {
    match addr.version {
        Some(version) => version == 4,
        None => matches!(addr.addr.parse::<IpAddr>(), Ok(IpAddr::V4(_))),
    }
}

fn is_v6(addr: &str) -> bool {
    matches!(addr.parse::<IpAddr>(), Ok(IpAddr::V6(_)))
}

/// A declared interface and what is known about its provider network
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceTarget {
    pub index: usize,
    pub public: bool,
    /// Provider network name the interface is bound to
    pub provider_network: Option<String>,
}

/// Addresses observed for one interface
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedAddresses {
    pub ip: Option<String>,
    pub ipv6: Option<String>,
}

/// Assigns the node's addresses to `targets`
///
/// Interfaces bound to a provider network the node reports addresses for
/// take the first matching IPv4 of their role and the first IPv6 on that
/// network. The remaining interfaces fall back to the flat address lists:
/// the first unclaimed public IPv4 (floating addresses included) and the
/// first unclaimed IPv6 for public interfaces, the first unclaimed private
/// IPv4 for private ones.
pub fn map_addresses(
    node: &Node,
    targets: &[InterfaceTarget],
    floating_ips: &[String],
) -> BTreeMap<usize, ObservedAddresses> {
    let mut observed = BTreeMap::new();
    let mut claimed: HashSet<String> = HashSet::new();
    let mut unmatched = Vec::new();

    let by_network = node.addresses.as_ref();
    for target in targets {
        let addrs = target
            .provider_network
            .as_deref()
            .and_then(|name| by_network.and_then(|map| map.get(name)));

        let Some(addrs) = addrs.filter(|a| !a.is_empty()) else {
            unmatched.push(target);
            continue;
        };

        let v4: Vec<&NodeAddress> = addrs.iter().filter(|a| is_v4(a)).collect();
        let preferred = if target.public {
            v4.iter().find(|a| !is_private_ip(&a.addr))
        } else {
            v4.iter()
                .find(|a| a.kind.as_deref() != Some("floating") && is_private_ip(&a.addr))
        };
        let ip = preferred.or_else(|| v4.first()).map(|a| a.addr.clone());
        let ipv6 = addrs
            .iter()
            .find(|a| !is_v4(a) && is_v6(&a.addr))
            .map(|a| a.addr.clone());

        claimed.extend(ip.iter().cloned());
        claimed.extend(ipv6.iter().cloned());
        observed.insert(target.index, ObservedAddresses { ip, ipv6 });
    }

    if unmatched.is_empty() {
        return observed;
    }

    // flat lists, plus anything the per-network map carried
    let mut public: Vec<String> = Vec::new();
    let mut private: Vec<String> = Vec::new();
    let mut push = |addr: &str| {
        if is_private_ip(addr) {
            private.push(addr.to_string());
        } else {
            public.push(addr.to_string());
        }
    };
    node.public_ips.iter().for_each(|a| push(a));
    floating_ips.iter().for_each(|a| push(a));
    node.private_ips.iter().for_each(|a| push(a));
    if let Some(map) = by_network {
        map.values().flatten().for_each(|a| push(&a.addr));
    }

    let mut take = |pool: &[String], want_v6: bool| -> Option<String> {
        let found = pool
            .iter()
            .find(|a| is_v6(a) == want_v6 && !claimed.contains(*a))?
            .clone();
        claimed.insert(found.clone());
        Some(found)
    };

    for target in unmatched {
        let entry = if target.public {
            ObservedAddresses {
                ip: take(&public, false),
                ipv6: take(&public, true).or_else(|| take(&private, true)),
            }
        } else {
            ObservedAddresses {
                ip: take(&private, false),
                ipv6: None,
            }
        };
        observed.insert(target.index, entry);
    }

    observed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::NodeState;

    fn node(public: &[&str], private: &[&str]) -> Node {
        Node {
            id: "1".into(),
            name: "node".into(),
            state: NodeState::Running,
            flavor_id: "small".into(),
            vm_state: None,
            public_ips: public.iter().map(|s| s.to_string()).collect(),
            private_ips: private.iter().map(|s| s.to_string()).collect(),
            addresses: None,
            volumes_attached: Vec::new(),
            security_groups: Vec::new(),
        }
    }

    fn target(index: usize, public: bool, network: Option<&str>) -> InterfaceTarget {
        InterfaceTarget {
            index,
            public,
            provider_network: network.map(String::from),
        }
    }

    #[test]
    fn test_is_private_ip() {
        assert!(is_private_ip("10.0.0.1"));
        assert!(is_private_ip("192.168.1.1"));
        assert!(is_private_ip("100.64.1.1"));
        assert!(is_private_ip("fd00::1"));
        assert!(!is_private_ip("8.8.8.8"));
        assert!(!is_private_ip("2001:db8::1"));
        assert!(!is_private_ip("garbage"));
    }

    #[test]
    fn test_flat_lists() {
        let node = node(&["8.8.8.8", "2001:db8::1"], &["10.0.0.1"]);
        let targets = vec![target(0, true, None), target(1, false, None)];

        let observed = map_addresses(&node, &targets, &[]);
        assert_eq!(observed[&0].ip.as_deref(), Some("8.8.8.8"));
        assert_eq!(observed[&0].ipv6.as_deref(), Some("2001:db8::1"));
        assert_eq!(observed[&1].ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(observed[&1].ipv6, None);
    }

    #[test]
    fn test_by_network_splits_v4_and_v6() {
        let mut node = node(&[], &[]);
        node.addresses = Some(BTreeMap::from([(
            "public".to_string(),
            vec![
                NodeAddress::new("8.8.8.8").with_version(4),
                NodeAddress::new("8.8.4.4").with_version(4),
                NodeAddress::new("2001:db8::1").with_version(6),
            ],
        )]));
        let targets = vec![target(0, true, Some("public"))];

        let observed = map_addresses(&node, &targets, &[]);
        assert_eq!(observed[&0].ip.as_deref(), Some("8.8.8.8"));
        assert_eq!(observed[&0].ipv6.as_deref(), Some("2001:db8::1"));
    }

    #[test]
    fn test_floating_address_serves_public_interface() {
        let node = node(&[], &["10.0.0.1"]);
        let targets = vec![target(0, true, None), target(1, false, None)];

        let observed = map_addresses(&node, &targets, &["8.8.8.8".to_string()]);
        assert_eq!(observed[&0].ip.as_deref(), Some("8.8.8.8"));
        assert_eq!(observed[&1].ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_claimed_addresses_are_not_reused() {
        let node = node(&[], &["10.0.0.1", "10.0.1.1"]);
        let targets = vec![target(0, false, None), target(1, false, None)];

        let observed = map_addresses(&node, &targets, &[]);
        assert_eq!(observed[&0].ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(observed[&1].ip.as_deref(), Some("10.0.1.1"));
    }
}
