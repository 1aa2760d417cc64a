//! Declared networks

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A network as declared by the infrastructure description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    /// Declared network name
    pub id: String,

    /// Public/outbound role
    pub outbound: bool,

    /// Provider network (name or id) or floating IP pool to use
    pub provider_id: Option<String>,

    /// Explicit CIDR for created networks; may contain `*` octets
    pub cidr: Option<String>,

    /// Whether the connector should create the network when missing
    pub create: bool,

    /// Inbound ports opened on public networks
    pub outports: Vec<PortRange>,

    /// Explicit security group name
    pub sg_name: Option<String>,

    pub dns_servers: Vec<String>,

    /// Virtual router system serving a destination through this network
    pub router: Option<RouterTarget>,
}

impl Network {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn public(id: impl Into<String>) -> Self {
        Self {
            outbound: true,
            ..Self::new(id)
        }
    }

    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.cidr = Some(cidr.into());
        self
    }

    pub fn with_outports(mut self, outports: Vec<PortRange>) -> Self {
        self.outports = outports;
        self
    }

    pub fn with_router(mut self, router: RouterTarget) -> Self {
        self.router = Some(router);
        self
    }

    pub fn is_public(&self) -> bool {
        self.outbound
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Icmp => write!(f, "icmp"),
        }
    }
}

/// An inbound port range open to a remote CIDR
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub remote_cidr: String,
    pub protocol: Protocol,
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn tcp(from: u16, to: u16) -> Self {
        Self {
            remote_cidr: "0.0.0.0/0".to_string(),
            protocol: Protocol::Tcp,
            from,
            to,
        }
    }

    /// Parses an `outports` declaration such as `8080,9000:9100/udp,10.0.0.0/8-22`
    pub fn parse_list(value: &str) -> Result<Vec<PortRange>> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PortRange::parse)
            .collect()
    }

    fn parse(item: &str) -> Result<PortRange> {
        let invalid = || CloudError::InvalidConfig(format!("invalid outport: {}", item));

        let (remote_cidr, rest) = match item.rsplit_once('-') {
            Some((cidr, rest)) if cidr.contains('/') => (cidr.to_string(), rest),
            _ => ("0.0.0.0/0".to_string(), item),
        };

        let (ports, protocol) = match rest.rsplit_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some(_) => return Err(invalid()),
            None => (rest, Protocol::Tcp),
        };

        let (from, to) = match ports.split_once(':') {
            Some((from, to)) => (
                from.parse().map_err(|_| invalid())?,
                to.parse().map_err(|_| invalid())?,
            ),
            None => {
                let port = ports.parse().map_err(|_| invalid())?;
                (port, port)
            }
        };

        if from > to {
            return Err(invalid());
        }

        Ok(PortRange {
            remote_cidr,
            protocol,
            from,
            to,
        })
    }
}

/// `router = '<destination cidr>,<system name>'` on a private network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterTarget {
    pub destination: String,
    pub system: String,
}

impl RouterTarget {
    pub fn parse(value: &str) -> Result<Self> {
        match value.split_once(',') {
            Some((destination, system)) if !destination.trim().is_empty() => Ok(Self {
                destination: destination.trim().to_string(),
                system: system.trim().to_string(),
            }),
            _ => Err(CloudError::InvalidConfig(format!(
                "invalid router declaration: {}",
                value
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_outports() {
        let ports = PortRange::parse_list("8080,9000:9100/udp, 10.0.0.0/8-22").unwrap();
        assert_eq!(
            ports,
            vec![
                PortRange::tcp(8080, 8080),
                PortRange {
                    remote_cidr: "0.0.0.0/0".into(),
                    protocol: Protocol::Udp,
                    from: 9000,
                    to: 9100
                },
                PortRange {
                    remote_cidr: "10.0.0.0/8".into(),
                    protocol: Protocol::Tcp,
                    from: 22,
                    to: 22
                },
            ]
        );
    }

    #[test]
    fn test_parse_outports_rejects_garbage() {
        assert!(PortRange::parse_list("http").is_err());
        assert!(PortRange::parse_list("100:10").is_err());
        assert!(PortRange::parse_list("80/sctp").is_err());
    }

    #[test]
    fn test_parse_router_target() {
        let target = RouterTarget::parse("10.0.0.0/16,vrouter1").unwrap();
        assert_eq!(target.destination, "10.0.0.0/16");
        assert_eq!(target.system, "vrouter1");
        assert!(RouterTarget::parse("vrouter1").is_err());
    }
}
