use serde::{Deserialize, Serialize};

mod keyring_store;
mod memory;

pub use keyring_store::KeyringSecretStore;
pub use memory::MemorySecretStore;

/// Address of one secret in a store: the keychain service plus the account
/// the secret is filed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretId {
    pub service: String,
    pub account: String,
}

impl SecretId {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

impl std::fmt::Display for SecretId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.account)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KeystoreError {
    #[error("secret store unavailable: {message}")]
    Unavailable { message: String },
    #[error("can't read secret {id}: {message}")]
    Read { id: String, message: String },
    #[error("can't write secret {id}: {message}")]
    Write { id: String, message: String },
}

/// Capability over a local secret store. Implementations are injected into
/// whatever needs a cached credential; nothing reaches for a global store.
pub trait SecretStore: Send + Sync {
    fn get_secret(&self, id: &SecretId) -> Result<Option<String>, KeystoreError>;
    fn set_secret(&self, id: &SecretId, value: &str) -> Result<(), KeystoreError>;
    fn delete_secret(&self, id: &SecretId) -> Result<(), KeystoreError>;
}
