//! Cirrus Cloud Core
//!
//! This crate holds everything the cloud connectors share: the declarative
//! infrastructure model, the connector trait, and the provider-neutral
//! building blocks the connectors compose.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │             Owning orchestration layer           │
//! │        (control API, per-VM serialization)       │
//! └─────────────────┬───────────────────────┬───────┘
//!                   │                       │
//! ┌─────────────────▼───────────────┐ ┌─────▼───────┐
//! │           cirrus-cloud          │ │    Store    │
//! │  ┌───────────────────────────┐  │ │  (SQLite)   │
//! │  │  trait CloudConnector     │  │ └─────────────┘
//! │  │  ConnectorRegistry        │  │
//! │  └───────────────────────────┘  │
//! │  ┌──────────┐ ┌──────────────┐  │
//! │  │   CIDR   │ │    Quota     │  │
//! │  └──────────┘ └──────────────┘  │
//! │  ┌──────────┐ ┌──────────────┐  │
//! │  │  Driver  │ │ Retry / DNS  │  │
//! │  │  cache   │ │              │  │
//! │  └──────────┘ └──────────────┘  │
//! └─────────────────┬───────────────┘
//!                   │
//!           ┌───────▼───────┐
//!           │   openstack   │
//!           │   connector   │
//!           └───────────────┘
//! ```

pub mod cidr;
pub mod connector;
pub mod credentials;
pub mod dns;
pub mod driver;
pub mod error;
pub mod image_uri;
pub mod model;
pub mod quota;
pub mod report;
pub mod retry;
pub mod store;

// Re-exports
pub use cidr::{CidrWildcards, cidr_wildcard_iterator};
pub use connector::{CloudConnector, ConnectorRegistry, ImageInfo, LaunchRetry};
pub use credentials::{CloudSite, Credential, first_compatible, host_of};
pub use dns::{DnsUpdater, HttpDynDns};
pub use driver::DriverCache;
pub use error::{CloudError, Result};
pub use image_uri::ImageUri;
pub use model::*;
pub use quota::{ProviderQuota, QuotaCategory, QuotaReport, QuotaUsage};
pub use report::{CleanupReport, StepResult};
pub use retry::{RetryConfig, Sleeper, TokioSleeper, poll_until, retry_transient};
pub use store::{Row, Store, StoreError, StoreResult};
pub use tokio_util::sync::CancellationToken;
