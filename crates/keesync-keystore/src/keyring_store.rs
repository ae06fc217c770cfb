use keyring::Entry;
use tracing::debug;

use crate::{KeystoreError, SecretId, SecretStore};

/// Secret store backed by the platform keychain.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringSecretStore;

impl KeyringSecretStore {
    pub fn new() -> Self {
        Self
    }

    fn entry(id: &SecretId) -> Result<Entry, KeystoreError> {
        Entry::new(&id.service, &id.account).map_err(|err| KeystoreError::Unavailable {
            message: err.to_string(),
        })
    }
}

impl SecretStore for KeyringSecretStore {
    fn get_secret(&self, id: &SecretId) -> Result<Option<String>, KeystoreError> {
        let entry = Self::entry(id)?;
        match entry.get_password() {
            Ok(value) if value.is_empty() => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeystoreError::Read {
                id: id.to_string(),
                message: err.to_string(),
            }),
        }
    }

    fn set_secret(&self, id: &SecretId, value: &str) -> Result<(), KeystoreError> {
        let entry = Self::entry(id)?;
        entry
            .set_password(value)
            .map_err(|err| KeystoreError::Write {
                id: id.to_string(),
                message: err.to_string(),
            })?;
        debug!(secret = %id, "stored secret in keychain");
        Ok(())
    }

    fn delete_secret(&self, id: &SecretId) -> Result<(), KeystoreError> {
        let entry = Self::entry(id)?;
        match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(KeystoreError::Write {
                id: id.to_string(),
                message: err.to_string(),
            }),
        }
    }
}
