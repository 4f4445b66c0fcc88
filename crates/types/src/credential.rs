//! Bearer credential model and the storage contract it lives behind.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque bearer token plus the instant it stops being valid.
///
/// The expiry is either tracked explicitly (for example from an `expiresIn`
/// field returned at login) or read from the `exp` claim embedded in a JWT.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Raw token value, sent as `Authorization: Bearer <token>`.
    pub token: String,
    /// Explicitly tracked expiry. Falls back to the embedded claim when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Build a credential with an explicitly tracked expiry.
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Build a credential whose expiry is read from the token itself.
    pub fn from_token(token: impl Into<String>) -> Self {
        let token = token.into();
        let expires_at = embedded_expiry(&token);
        Self { token, expires_at }
    }

    /// Expiry instant, tracked or embedded. `None` means the expiry is unknown.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at.or_else(|| embedded_expiry(&self.token))
    }

    /// Value for the `Authorization` header.
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

/// Read the `exp` claim from a JWT payload segment, if the token is a JWT.
fn embedded_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&decoded).ok()?;
    DateTime::from_timestamp(claim.exp, 0)
}

/// Errors surfaced by credential store backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialStoreError {
    /// The underlying storage rejected the operation.
    #[error("credential backend error: {message}")]
    Backend { message: String },
    /// A stored value could not be decoded.
    #[error("stored credential is unreadable: {message}")]
    Corrupt { message: String },
}

/// Process-wide storage for the single session credential.
///
/// Only the token gate writes through this contract; everything else reads.
pub trait CredentialStore: Send + Sync {
    /// Current credential, if one is stored.
    fn read(&self) -> Result<Option<Credential>, CredentialStoreError>;

    /// Replace the stored credential.
    fn write(&self, credential: &Credential) -> Result<(), CredentialStoreError>;

    /// Remove the stored credential. Clearing an empty store succeeds.
    fn clear(&self) -> Result<(), CredentialStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jwt_with_exp(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"42","exp":{exp}}}"#));
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn reads_expiry_from_jwt_claim() {
        let credential = Credential::from_token(jwt_with_exp(1_700_000_000));
        let expected = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(credential.expires_at(), Some(expected));
    }

    #[test]
    fn tracked_expiry_wins_over_embedded_claim() {
        let tracked = Utc.timestamp_opt(1_800_000_000, 0).unwrap();
        let credential = Credential::new(jwt_with_exp(1_700_000_000), Some(tracked));
        assert_eq!(credential.expires_at(), Some(tracked));
    }

    #[test]
    fn opaque_tokens_have_unknown_expiry() {
        assert_eq!(Credential::from_token("opaque-token").expires_at(), None);
        assert_eq!(Credential::from_token("a.b.c").expires_at(), None);
    }

    #[test]
    fn debug_output_hides_token() {
        let credential = Credential::new("super-secret", None);
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("super-secret"));
        assert_eq!(credential.bearer_header(), "Bearer super-secret");
    }
}
