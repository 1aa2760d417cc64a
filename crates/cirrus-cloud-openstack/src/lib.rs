//! OpenStack connector for Cirrus
//!
//! This crate implements the `CloudConnector` trait for OpenStack sites,
//! driving compute, networking and block storage through the
//! [`OpenStackApi`] client contract.
//!
//! # Features
//!
//! - Instance type selection from the flavor catalog (accelerators included)
//! - Node launch with block device mappings and network resolution
//! - Network, router, security group and floating IP reconciliation
//! - Resize, volume and connection changes on running nodes
//! - Ordered, best-effort release of everything a VM owns
//! - Snapshots, image catalog and quotas
//!
//! # Example
//!
//! ```ignore
//! use cirrus_cloud::{CloudConnector, CloudSite};
//! use cirrus_cloud_openstack::OpenStackConnector;
//!
//! let site = CloudSite::new("ost", "OpenStack", "ost", "https://server.com:5000");
//! let connector = OpenStackConnector::new(site, factory);
//!
//! let types = connector.concrete_system(&system, &credentials).await?;
//! let launched = connector.launch(&mut infra, &system, 1, &credentials).await?;
//! ```

pub mod addresses;
pub mod api;
pub mod auth;
pub mod error;
pub mod flavors;
pub mod network;
pub mod provider;
pub mod quotas;
pub mod volumes;

mod alter;
mod finalize;
mod images;
mod lifecycle;

pub use api::{DriverFactory, OpenStackApi};
pub use auth::{AuthParams, AuthScheme};
pub use error::{OpenStackError, Result};
pub use lifecycle::PowerAction;
pub use provider::{OpenStackConnector, PROVIDER_TYPE, Pacing};
