//! Caller credential extraction.
//!
//! A credential arrives either as an `Authorization: Bearer <token>` header
//! or as an `apiKey` query parameter. Only presence and surface format are
//! checked here; the upstream service decides whether the secret is valid.
//!
//! The two sources are deliberately not normalized the same way: bearer
//! tokens are taken verbatim after the prefix, API keys are trimmed.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

/// Exact, case-sensitive prefix of a bearer `Authorization` header.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Why a credential could not be extracted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("Missing or invalid Authorization header")]
    MissingAuthorization,
    #[error("Bearer token is empty")]
    EmptyBearer,
    #[error("Missing or invalid apiKey query parameter")]
    MissingApiKey,
    #[error("API key is empty")]
    EmptyApiKey,
    #[error(
        "Authentication required: provide an Authorization: Bearer <token> header \
         or an apiKey query parameter ({bearer}; {api_key})"
    )]
    Unresolved {
        bearer: Box<CredentialError>,
        api_key: Box<CredentialError>,
    },
}

/// The caller's secret, exactly one variant per request.
///
/// Secret material is held in a [`SecretString`] so it never shows up in
/// `Debug` output or logs.
#[derive(Debug)]
pub enum Credential {
    BearerToken(SecretString),
    ApiKey(SecretString),
}

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::BearerToken(SecretString::from(token.into()))
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey(SecretString::from(key.into()))
    }

    /// Short label for logs ("bearer" / "api_key").
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BearerToken(_) => "bearer",
            Self::ApiKey(_) => "api_key",
        }
    }

    /// The raw secret, for building the upstream `Authorization` header.
    pub fn expose(&self) -> &str {
        match self {
            Self::BearerToken(s) | Self::ApiKey(s) => s.expose_secret(),
        }
    }

    /// First 8 bytes of the SHA-256 of the secret, hex encoded.
    /// Lets logs correlate requests of one caller without leaking the secret.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.expose().as_bytes());
        hex::encode(&digest[..8])
    }
}

/// Extract a bearer token from an `Authorization` header value.
///
/// The remainder after `"Bearer "` is returned verbatim, including any
/// leading whitespace.
pub fn extract_bearer(header: Option<&str>) -> Result<String, CredentialError> {
    let token = header
        .and_then(|h| h.strip_prefix(BEARER_PREFIX))
        .ok_or(CredentialError::MissingAuthorization)?;

    if token.trim().is_empty() {
        return Err(CredentialError::EmptyBearer);
    }
    Ok(token.to_string())
}

/// Extract an API key from the `apiKey` query parameter, trimmed.
pub fn extract_api_key(query: Option<&str>) -> Result<String, CredentialError> {
    let raw = query.ok_or(CredentialError::MissingApiKey)?;
    let key = raw.trim();
    if key.is_empty() {
        return Err(CredentialError::EmptyApiKey);
    }
    Ok(key.to_string())
}

/// Resolve the request credential. The header wins when both are present.
pub fn resolve(header: Option<&str>, api_key: Option<&str>) -> Result<Credential, CredentialError> {
    let bearer_err = match extract_bearer(header) {
        Ok(token) => return Ok(Credential::bearer(token)),
        Err(e) => e,
    };

    match extract_api_key(api_key) {
        Ok(key) => Ok(Credential::api_key(key)),
        Err(api_key_err) => Err(CredentialError::Unresolved {
            bearer: Box::new(bearer_err),
            api_key: Box::new(api_key_err),
        }),
    }
}
