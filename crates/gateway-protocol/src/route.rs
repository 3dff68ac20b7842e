//! Vault routing resolution.
//!
//! Every request addresses one vault. The vault id and URL come from the
//! request's query string, falling back to process-wide defaults; the
//! cluster id is always derived from the URL, never supplied.

use serde::Serialize;

const HTTPS_SCHEME: &str = "https://";

/// Why a route could not be resolved. Checked in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("vaultId is required: pass the vaultId query parameter or set VAULT_ID")]
    MissingVaultId,
    #[error("vaultUrl is required: pass the vaultUrl query parameter or set VAULT_URL")]
    MissingVaultUrl,
    #[error("Invalid vaultUrl format: expected https://<cluster>.vault..., got {url}")]
    InvalidVaultUrl { url: String },
}

/// Routing values supplied explicitly by one request.
#[derive(Debug, Clone, Default)]
pub struct RouteParams {
    pub vault_id: Option<String>,
    pub vault_url: Option<String>,
    pub account_id: Option<String>,
    pub workspace_id: Option<String>,
}

/// Process-wide fallbacks, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct RouteDefaults {
    pub vault_id: Option<String>,
    pub vault_url: Option<String>,
    pub account_id: Option<String>,
    pub workspace_id: Option<String>,
}

/// The resolved address of one tenant's vault.
///
/// Fields are private: a route only exists if its cluster id could be
/// derived from its URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultRoute {
    vault_id: String,
    cluster_id: String,
    vault_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    workspace_id: Option<String>,
}

impl VaultRoute {
    pub fn new(
        vault_id: impl Into<String>,
        vault_url: impl Into<String>,
        account_id: Option<String>,
        workspace_id: Option<String>,
    ) -> Result<Self, RouteError> {
        let vault_url = vault_url.into();
        let cluster_id = extract_cluster_id(&vault_url)
            .ok_or_else(|| RouteError::InvalidVaultUrl { url: vault_url.clone() })?;

        Ok(Self {
            vault_id: vault_id.into(),
            cluster_id,
            vault_url,
            account_id,
            workspace_id,
        })
    }

    pub fn vault_id(&self) -> &str {
        &self.vault_id
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn vault_url(&self) -> &str {
        &self.vault_url
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    /// Vault URL without a trailing slash, suitable as an API base.
    pub fn base_url(&self) -> &str {
        self.vault_url.trim_end_matches('/')
    }
}

/// Derive the cluster id from `https://<cluster>.vault...`.
///
/// Path, query and fragment are ignored. Any other scheme, or a host whose
/// second label does not start with `vault`, yields `None`.
pub fn extract_cluster_id(vault_url: &str) -> Option<String> {
    let rest = vault_url.strip_prefix(HTTPS_SCHEME)?;
    let host_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let host = &rest[..host_end];

    let (cluster, tail) = host.split_once('.')?;
    let valid_cluster = !cluster.is_empty()
        && cluster.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_cluster || !tail.starts_with("vault") {
        return None;
    }
    Some(cluster.to_string())
}

/// Resolve a route: explicit value, then process default, then failure.
///
/// Blank values count as absent. `vaultId` is checked before `vaultUrl`,
/// and a present but malformed URL is reported separately from a missing
/// one.
pub fn resolve(params: RouteParams, defaults: &RouteDefaults) -> Result<VaultRoute, RouteError> {
    let vault_id = pick(params.vault_id, &defaults.vault_id).ok_or(RouteError::MissingVaultId)?;
    let vault_url = pick(params.vault_url, &defaults.vault_url).ok_or(RouteError::MissingVaultUrl)?;

    VaultRoute::new(
        vault_id,
        vault_url,
        pick(params.account_id, &defaults.account_id),
        pick(params.workspace_id, &defaults.workspace_id),
    )
}

fn pick(explicit: Option<String>, fallback: &Option<String>) -> Option<String> {
    non_blank(explicit).or_else(|| non_blank(fallback.clone()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(vault_id: Option<&str>, vault_url: Option<&str>) -> RouteParams {
        RouteParams {
            vault_id: vault_id.map(String::from),
            vault_url: vault_url.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn cluster_id_from_host() {
        assert_eq!(
            extract_cluster_id("https://abc123.vault.skyflowapis.com").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            extract_cluster_id("https://abc123.vault.skyflowapis.com/x/y").as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn cluster_id_rejects_other_shapes() {
        assert_eq!(extract_cluster_id("http://abc123.vault.skyflowapis.com"), None);
        assert_eq!(extract_cluster_id("not-a-url"), None);
        assert_eq!(extract_cluster_id("https://.vault.x.com"), None);
        assert_eq!(extract_cluster_id("https://abc.api.x.com"), None);
        assert_eq!(extract_cluster_id("https://localhost/vault"), None);
    }

    #[test]
    fn explicit_beats_default() {
        let defaults = RouteDefaults {
            vault_id: Some("env-vault".into()),
            vault_url: Some("https://env.vault.x.com".into()),
            account_id: Some("acc-env".into()),
            workspace_id: None,
        };
        let route = resolve(params(Some("v1"), Some("https://c1.vault.x.com")), &defaults).unwrap();
        assert_eq!(route.vault_id(), "v1");
        assert_eq!(route.cluster_id(), "c1");
        assert_eq!(route.account_id(), Some("acc-env"));
        assert_eq!(route.workspace_id(), None);
    }

    #[test]
    fn defaults_fill_missing_and_blank_values() {
        let defaults = RouteDefaults {
            vault_id: Some("env-vault".into()),
            vault_url: Some("https://env.vault.x.com".into()),
            ..Default::default()
        };
        let route = resolve(params(Some("  "), None), &defaults).unwrap();
        assert_eq!(route.vault_id(), "env-vault");
        assert_eq!(route.cluster_id(), "env");
    }

    #[test]
    fn vault_id_checked_before_vault_url() {
        let err = resolve(params(None, Some("https://c1.vault.x.com")), &RouteDefaults::default())
            .unwrap_err();
        assert_eq!(err, RouteError::MissingVaultId);

        let err = resolve(params(None, None), &RouteDefaults::default()).unwrap_err();
        assert_eq!(err, RouteError::MissingVaultId);
    }

    #[test]
    fn malformed_url_is_not_reported_as_missing() {
        let err = resolve(params(Some("v1"), Some("not-a-url")), &RouteDefaults::default())
            .unwrap_err();
        assert!(matches!(err, RouteError::InvalidVaultUrl { .. }));
        assert!(err.to_string().starts_with("Invalid vaultUrl format"));

        let err = resolve(params(Some("v1"), None), &RouteDefaults::default()).unwrap_err();
        assert_eq!(err, RouteError::MissingVaultUrl);
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let route = VaultRoute::new("v1", "https://c1.vault.x.com/", None, None).unwrap();
        assert_eq!(route.base_url(), "https://c1.vault.x.com");
    }
}
