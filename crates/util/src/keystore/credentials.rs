//! Session credential persistence backed by the OS keychain or process memory.

use std::sync::{Arc, Mutex, PoisonError};

use bizscope_types::{Credential, CredentialStore, CredentialStoreError};
use tracing::debug;

static SERVICE: &str = "bizscope";
static ACCOUNT: &str = "session";
/// Environment variable used to select the credential storage backend.
pub const CREDENTIALS_BACKEND_ENV_VAR: &str = "BIZSCOPE_CREDENTIALS_BACKEND";

/// Credential storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsBackend {
    /// Persist the session credential in the OS keychain (`keyring-rs`).
    Keychain,
    /// Keep the credential in process memory only.
    Memory,
}

impl CredentialsBackend {
    fn from_env_var(raw: Option<String>) -> Self {
        match raw.unwrap_or_default().trim().to_ascii_lowercase().as_str() {
            "memory" | "env" => Self::Memory,
            _ => Self::Keychain,
        }
    }

    /// Determine the configured backend from the environment.
    pub fn from_env() -> Self {
        Self::from_env_var(std::env::var(CREDENTIALS_BACKEND_ENV_VAR).ok())
    }
}

/// Build the credential store selected by [`CREDENTIALS_BACKEND_ENV_VAR`].
pub fn credential_store_from_env() -> Arc<dyn CredentialStore> {
    match CredentialsBackend::from_env() {
        CredentialsBackend::Keychain => Arc::new(KeyringCredentialStore::default()),
        CredentialsBackend::Memory => Arc::new(InMemoryCredentialStore::new()),
    }
}

/// Stores the credential as JSON in a single keychain entry.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
    account: String,
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(SERVICE, ACCOUNT)
    }
}

impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, CredentialStoreError> {
        keyring::Entry::new(&self.service, &self.account).map_err(|e| CredentialStoreError::Backend { message: e.to_string() })
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn read(&self) -> Result<Option<Credential>, CredentialStoreError> {
        match self.entry()?.get_password() {
            Ok(raw) => decode_credential(&raw).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CredentialStoreError::Backend { message: e.to_string() }),
        }
    }

    fn write(&self, credential: &Credential) -> Result<(), CredentialStoreError> {
        let raw = serde_json::to_string(credential).map_err(|e| CredentialStoreError::Corrupt { message: e.to_string() })?;
        self.entry()?
            .set_password(&raw)
            .map_err(|e| CredentialStoreError::Backend { message: e.to_string() })?;
        debug!(service = %self.service, "stored session credential in keychain");
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialStoreError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                debug!(service = %self.service, "removed session credential from keychain");
                Ok(())
            }
            Err(e) => Err(CredentialStoreError::Backend { message: e.to_string() }),
        }
    }
}

fn decode_credential(raw: &str) -> Result<Credential, CredentialStoreError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') {
        // A bare token written by another tool.
        return Ok(Credential::from_token(trimmed));
    }
    serde_json::from_str(trimmed).map_err(|e| CredentialStoreError::Corrupt { message: e.to_string() })
}

/// In-memory credential store, used for tests and keychain-free sessions.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    credential: Mutex<Option<Credential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn read(&self) -> Result<Option<Credential>, CredentialStoreError> {
        Ok(self.credential.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn write(&self, credential: &Credential) -> Result<(), CredentialStoreError> {
        *self.credential.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialStoreError> {
        self.credential.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn backend_defaults_to_keychain_when_env_var_is_missing() {
        temp_env::with_var(CREDENTIALS_BACKEND_ENV_VAR, None::<&str>, || {
            assert_eq!(CredentialsBackend::from_env(), CredentialsBackend::Keychain);
        });
    }

    #[test]
    fn backend_uses_memory_when_configured() {
        temp_env::with_var(CREDENTIALS_BACKEND_ENV_VAR, Some(" Memory "), || {
            assert_eq!(CredentialsBackend::from_env(), CredentialsBackend::Memory);
        });
    }

    #[test]
    fn in_memory_store_round_trip() {
        let store = InMemoryCredentialStore::new();
        assert!(store.read().unwrap().is_none());

        let credential = Credential::new("token-a", Some(Utc.timestamp_opt(1_900_000_000, 0).unwrap()));
        store.write(&credential).unwrap();
        assert_eq!(store.read().unwrap(), Some(credential));

        store.clear().unwrap();
        assert!(store.read().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn decodes_json_and_bare_tokens() {
        let json = r#"{"token":"abc","expires_at":"2030-01-01T00:00:00Z"}"#;
        let decoded = decode_credential(json).unwrap();
        assert_eq!(decoded.token, "abc");
        assert!(decoded.expires_at.is_some());

        assert_eq!(decode_credential("plain-token").unwrap().token, "plain-token");
        assert!(matches!(decode_credential("{not json"), Err(CredentialStoreError::Corrupt { .. })));
    }
}
