//! Cloud sites and the credentials offered for them

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};

/// One provider endpoint a connector talks to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudSite {
    pub id: String,
    /// Provider type tag, e.g. "OpenStack"
    pub provider_type: String,
    /// Image URI scheme, e.g. "ost"
    pub scheme: String,
    /// Host used in image URIs, e.g. "server.com"
    pub host: String,
    /// Identity endpoint, e.g. "https://server.com:5000"
    pub endpoint: String,
    /// Auth version the site requires; any supported one when unset
    pub auth_version: Option<String>,
    pub tenant: Option<String>,
}

impl CloudSite {
    pub fn new(
        id: impl Into<String>,
        provider_type: impl Into<String>,
        scheme: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into();
        Self {
            id: id.into(),
            provider_type: provider_type.into(),
            scheme: scheme.into(),
            host: host_of(&endpoint).to_string(),
            endpoint,
            auth_version: None,
            tenant: None,
        }
    }

    pub fn with_auth_version(mut self, version: impl Into<String>) -> Self {
        self.auth_version = Some(version.into());
        self
    }
}

/// A credential entry from the caller's authentication data
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub provider_type: String,
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tenant: Option<String>,
    pub domain: Option<String>,
    pub tenant_domain_id: Option<String>,
    pub auth_version: Option<String>,
    pub proxy: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Credential {
    pub fn new(id: impl Into<String>, provider_type: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            provider_type: provider_type.into(),
            ..Default::default()
        }
    }

    /// Stable digest of every field, secrets included
    ///
    /// A cached driver stays valid while the fingerprint of the entry that
    /// built it is unchanged.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Type and host match `site`
    pub fn applies_to(&self, site: &CloudSite) -> bool {
        if !self.provider_type.eq_ignore_ascii_case(&site.provider_type) {
            return false;
        }
        match &self.host {
            Some(host) => host_of(host) == site.host,
            None => true,
        }
    }
}

/// Picks the first entry for `site` that `scheme` can turn into auth parameters
pub fn first_compatible<'a, P>(
    site: &CloudSite,
    candidates: &'a [Credential],
    mut scheme: impl FnMut(&Credential) -> Option<P>,
) -> Option<(&'a Credential, P)> {
    candidates
        .iter()
        .filter(|c| c.applies_to(site))
        .find_map(|c| scheme(c).map(|params| (c, params)))
}

/// Host part of an endpoint: `https://server.com:5000/v3` -> `server.com`
pub fn host_of(endpoint: &str) -> &str {
    let without_scheme = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    authority.split(':').next().unwrap_or(authority)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> CloudSite {
        CloudSite::new("ost", "OpenStack", "ost", "https://server.com:5000")
    }

    fn password_entry(id: &str) -> Credential {
        Credential {
            host: Some("https://server.com:5000".into()),
            username: Some("user".into()),
            password: Some("pass".into()),
            tenant: Some("tenant".into()),
            ..Credential::new(id, "OpenStack")
        }
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://server.com:5000"), "server.com");
        assert_eq!(host_of("https://server.com:5000/v3/"), "server.com");
        assert_eq!(host_of("server.com"), "server.com");
    }

    #[test]
    fn test_applies_to() {
        assert!(password_entry("ost").applies_to(&site()));

        let other_type = Credential::new("one", "OpenNebula");
        assert!(!other_type.applies_to(&site()));

        let other_host = Credential {
            host: Some("https://other.org:5000".into()),
            ..password_entry("ost")
        };
        assert!(!other_host.applies_to(&site()));
    }

    #[test]
    fn test_fingerprint_changes_with_secret() {
        let entry = password_entry("ost");
        let same = password_entry("ost");
        let rotated = Credential {
            password: Some("new_pass".into()),
            ..password_entry("ost")
        };

        assert_eq!(entry.fingerprint(), same.fingerprint());
        assert_ne!(entry.fingerprint(), rotated.fingerprint());
    }

    #[test]
    fn test_first_compatible_skips_unusable() {
        let entries = vec![
            Credential::new("im", "InfrastructureManager"),
            Credential {
                proxy: Some("proxy".into()),
                ..Credential::new("x509", "OpenStack")
            },
            password_entry("ost"),
        ];

        let (entry, user) =
            first_compatible(&site(), &entries, |c| c.username.clone()).unwrap();
        assert_eq!(entry.id.as_deref(), Some("ost"));
        assert_eq!(user, "user");
    }

    #[test]
    fn test_deserialize_extra_fields() {
        let entry: Credential = serde_json::from_value(serde_json::json!({
            "id": "ost",
            "type": "OpenStack",
            "username": "user",
            "service_region": "RegionOne"
        }))
        .unwrap();

        assert_eq!(entry.provider_type, "OpenStack");
        assert_eq!(entry.extra.get("service_region").map(String::as_str), Some("RegionOne"));
    }
}
