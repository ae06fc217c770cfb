use std::collections::HashMap;
use std::sync::Mutex;

use crate::{KeystoreError, SecretId, SecretStore};

/// Process-local secret store, used by tests and by `--no-keychain` runs.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<SecretId, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(id: SecretId, value: impl Into<String>) -> Self {
        let store = Self::new();
        if let Ok(mut secrets) = store.secrets.lock() {
            secrets.insert(id, value.into());
        }
        store
    }

    fn poisoned() -> KeystoreError {
        KeystoreError::Unavailable {
            message: "secret store lock poisoned".to_string(),
        }
    }
}

impl SecretStore for MemorySecretStore {
    fn get_secret(&self, id: &SecretId) -> Result<Option<String>, KeystoreError> {
        let secrets = self.secrets.lock().map_err(|_| Self::poisoned())?;
        Ok(secrets.get(id).cloned())
    }

    fn set_secret(&self, id: &SecretId, value: &str) -> Result<(), KeystoreError> {
        let mut secrets = self.secrets.lock().map_err(|_| Self::poisoned())?;
        secrets.insert(id.clone(), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, id: &SecretId) -> Result<(), KeystoreError> {
        let mut secrets = self.secrets.lock().map_err(|_| Self::poisoned())?;
        secrets.remove(id);
        Ok(())
    }
}
