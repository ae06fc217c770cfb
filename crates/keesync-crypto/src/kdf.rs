use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use zeroize::Zeroize;

use crate::envelope::{CryptoError, SecretKey, KEY_LEN};
use crate::passphrase::Passphrase;

pub const SALT_LEN: usize = 16;

const MAX_MEMORY_KB: u32 = 1024 * 1024;
const MAX_ITERATIONS: u32 = 64;
const MAX_PARALLELISM: u32 = 16;

/// Argon2id cost parameters, stored alongside every encrypted database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kb: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kb: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Rejects parameters a hostile header could use to exhaust memory or CPU.
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(CryptoError::InvalidKdfParams);
        }
        if self.iterations == 0 || self.iterations > MAX_ITERATIONS {
            return Err(CryptoError::InvalidKdfParams);
        }
        if self.memory_kb < 8 * self.parallelism || self.memory_kb > MAX_MEMORY_KB {
            return Err(CryptoError::InvalidKdfParams);
        }
        Ok(())
    }
}

#[must_use]
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[instrument(level = "debug", skip(passphrase, salt), fields(salt_len = salt.len()))]
pub fn derive_key(
    passphrase: &Passphrase,
    salt: &[u8],
    params: &KdfParams,
) -> Result<SecretKey, CryptoError> {
    params.validate()?;
    let argon_params = Params::new(
        params.memory_kb,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|_| CryptoError::InvalidKdfParams)?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase.expose().as_bytes(), salt, &mut key)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    let derived = SecretKey::from_bytes(key);
    key.zeroize();
    Ok(derived)
}
