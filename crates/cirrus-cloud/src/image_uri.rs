//! `<scheme>://<provider-endpoint>/<native-id>` image and volume URIs

use crate::credentials::CloudSite;
use crate::error::{CloudError, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageUri {
    pub scheme: String,
    pub endpoint: String,
    pub id: String,
}

impl ImageUri {
    pub fn new(
        scheme: impl Into<String>,
        endpoint: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            endpoint: endpoint.into(),
            id: id.into(),
        }
    }

    /// URI of a native resource id on `site`
    pub fn for_site(site: &CloudSite, id: impl Into<String>) -> Self {
        Self::new(site.scheme.clone(), site.host.clone(), id)
    }

    pub fn belongs_to(&self, site: &CloudSite) -> bool {
        self.scheme == site.scheme && self.host() == site.host
    }

    /// Endpoint without port
    pub fn host(&self) -> &str {
        self.endpoint.split(':').next().unwrap_or(&self.endpoint)
    }

    /// Parses `uri` and checks that it belongs to `site`
    pub fn parse_for(uri: &str, site: &CloudSite) -> Result<Self> {
        let parsed: ImageUri = uri.parse()?;
        if !parsed.belongs_to(site) {
            return Err(CloudError::InvalidUri(format!(
                "{} does not belong to {}://{}",
                uri, site.scheme, site.host
            )));
        }
        Ok(parsed)
    }
}

impl FromStr for ImageUri {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CloudError::InvalidUri(s.to_string());

        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        let (endpoint, id) = rest.split_once('/').ok_or_else(invalid)?;
        if scheme.is_empty() || endpoint.is_empty() || id.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(scheme, endpoint, id))
    }
}

impl fmt::Display for ImageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.endpoint, self.id)
    }
}
