//! Keystone auth schemes
//!
//! Maps a credential entry to the parameters of one of the supported
//! schemes: username/password, a federated OIDC access token, or an X.509
//! VOMS proxy.

use cirrus_cloud::{CloudSite, Credential};
use serde::{Deserialize, Serialize};

pub const PASSWORD_V2: &str = "2.0_password";
pub const PASSWORD_V3: &str = "3.x_password";
pub const OIDC_ACCESS_TOKEN: &str = "3.x_oidc_access_token";
pub const VOMS_PROXY: &str = "2.0_voms";

pub const NO_COMPATIBLE_AUTH: &str = "No compatible OpenStack auth data has been specified.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthScheme {
    Password,
    OidcAccessToken,
    VomsProxy,
}

/// Everything a [`DriverFactory`](crate::DriverFactory) needs to authenticate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthParams {
    pub scheme: AuthScheme,
    pub auth_url: String,
    pub auth_version: String,
    /// User name, or identity provider for the token scheme; absent for proxies
    pub username: Option<String>,
    /// Password, access token or PEM proxy
    pub secret: String,
    /// Project name, or federation protocol for the token scheme
    pub tenant: Option<String>,
    pub domain_name: Option<String>,
    pub tenant_domain_id: Option<String>,
}

/// Auth parameters for `credential` on `site`, if the entry carries a usable scheme
pub fn auth_params(site: &CloudSite, credential: &Credential) -> Option<AuthParams> {
    let proxy_only = credential.username.is_none() && credential.proxy.is_some();
    let default_version = if proxy_only { VOMS_PROXY } else { PASSWORD_V2 };
    let version = credential.auth_version.as_deref().unwrap_or(default_version);
    if let Some(required) = site.auth_version.as_deref() {
        if required != version {
            return None;
        }
    }

    let tenant = credential.tenant.clone().or_else(|| site.tenant.clone());

    if version == VOMS_PROXY {
        // the proxy only identifies the user, the project must be named
        let secret = credential.proxy.clone()?;
        if tenant.is_none() {
            return None;
        }
        return Some(AuthParams {
            scheme: AuthScheme::VomsProxy,
            auth_url: site.endpoint.clone(),
            auth_version: version.to_string(),
            username: None,
            secret,
            tenant,
            domain_name: credential.domain.clone(),
            tenant_domain_id: credential.tenant_domain_id.clone(),
        });
    }

    let username = credential.username.clone()?;
    let secret = credential.password.clone()?;

    let scheme = match version {
        PASSWORD_V2 | PASSWORD_V3 => AuthScheme::Password,
        OIDC_ACCESS_TOKEN => {
            // protocol and project domain are mandatory for federation
            if tenant.is_none() || credential.domain.is_none() {
                return None;
            }
            AuthScheme::OidcAccessToken
        }
        other => {
            tracing::debug!("Unsupported auth version {}", other);
            return None;
        }
    };

    Some(AuthParams {
        scheme,
        auth_url: site.endpoint.clone(),
        auth_version: version.to_string(),
        username: Some(username),
        secret,
        tenant,
        domain_name: credential.domain.clone(),
        tenant_domain_id: credential.tenant_domain_id.clone(),
    })
}
