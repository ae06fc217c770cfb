use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use keesync_crypto::{
    derive_key, generate_salt, open, seal, CryptoError, Envelope, KdfParams, Passphrase,
    SecretKey, SALT_LEN,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::model::{
    Database, DatabaseMeta, Entry, EntryTimes, Field, FieldValue, Group, ProtectedValue,
    ProtectionKey,
};

pub(crate) const FILE_MAGIC: [u8; 4] = *b"KSDB";
const FILE_VERSION: u8 = 1;
const HEADER_LEN: usize = FILE_MAGIC.len() + 1 + 4 * 3 + SALT_LEN;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("wrong passphrase or corrupted database (integrity check failed)")]
    WrongPassphrase,
    #[error("not a keesync database: {0}")]
    InvalidFormat(&'static str),
    #[error("unsupported database version {0}")]
    UnsupportedVersion(u8),
    #[error("database still holds unlocked protected values")]
    UnlockedValues,
    #[error("protected value is sealed under another database's key")]
    ForeignProtectedValue,
    #[error("can't process KeePass database: {0}")]
    Kdbx(String),
    #[error("malformed database body")]
    Body(#[from] serde_json::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Turns database files into [`Database`] handles and back.
///
/// Decoded databases come back with their protected values locked.
/// Encoding refuses a database that still holds unlocked values.
pub trait DatabaseCodec: Send + Sync {
    fn decode(&self, bytes: &[u8], passphrase: &Passphrase) -> Result<Database, CodecError>;
    fn encode(&self, database: &Database) -> Result<Vec<u8>, CodecError>;
}

/// Passphrase-protected database format: a plaintext header with the KDF
/// parameters and salt, followed by an envelope sealing the JSON body.
#[derive(Debug, Clone, Copy, Default)]
pub struct VaultCodec;

#[derive(Serialize, Deserialize)]
struct StoredBody {
    protection_id: u64,
    protection_key: String,
    meta: StoredMeta,
    root: StoredGroup,
}

#[derive(Serialize, Deserialize)]
struct StoredMeta {
    name: String,
    #[serde(default)]
    generator: String,
    #[serde(default)]
    modified: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
struct StoredGroup {
    uuid: Uuid,
    name: String,
    #[serde(default)]
    entries: Vec<StoredEntry>,
    #[serde(default)]
    groups: Vec<StoredGroup>,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    uuid: Uuid,
    #[serde(default)]
    fields: Vec<StoredField>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    modified: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
struct StoredField {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    protected: Option<String>,
}

struct Header {
    kdf: KdfParams,
    salt: [u8; SALT_LEN],
}

impl Header {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&FILE_MAGIC);
        out.push(FILE_VERSION);
        out.extend_from_slice(&self.kdf.memory_kb.to_le_bytes());
        out.extend_from_slice(&self.kdf.iterations.to_le_bytes());
        out.extend_from_slice(&self.kdf.parallelism.to_le_bytes());
        out.extend_from_slice(&self.salt);
        out
    }

    fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::InvalidFormat("file is too short"));
        }
        if bytes[..4] != FILE_MAGIC {
            return Err(CodecError::InvalidFormat("bad magic"));
        }
        if bytes[4] != FILE_VERSION {
            return Err(CodecError::UnsupportedVersion(bytes[4]));
        }
        let word = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let kdf = KdfParams {
            memory_kb: word(5),
            iterations: word(9),
            parallelism: word(13),
        };
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&bytes[17..HEADER_LEN]);
        Ok(Self { kdf, salt })
    }
}

impl DatabaseCodec for VaultCodec {
    #[instrument(level = "debug", skip_all, fields(bytes_len = bytes.len()))]
    fn decode(&self, bytes: &[u8], passphrase: &Passphrase) -> Result<Database, CodecError> {
        let header = Header::parse(bytes)?;
        header
            .kdf
            .validate()
            .map_err(|_| CodecError::InvalidFormat("key derivation parameters out of range"))?;
        let key = derive_key(passphrase, &header.salt, &header.kdf)?;
        let envelope = Envelope::from_bytes(&bytes[HEADER_LEN..])
            .map_err(|_| CodecError::InvalidFormat("damaged payload"))?;
        let body = match open(&key, &envelope, &bytes[..HEADER_LEN]) {
            Ok(body) => Zeroizing::new(body),
            Err(CryptoError::DecryptionFailed) => return Err(CodecError::WrongPassphrase),
            Err(err) => return Err(err.into()),
        };
        let stored: StoredBody = serde_json::from_slice(&body)?;

        let key_bytes = Zeroizing::new(
            STANDARD
                .decode(stored.protection_key.as_bytes())
                .map_err(|_| CodecError::InvalidFormat("bad protection key"))?,
        );
        let protection =
            ProtectionKey::new(stored.protection_id, SecretKey::from_slice(&key_bytes)?);
        let root = group_from_stored(stored.root, protection.id())?;
        let meta = DatabaseMeta {
            name: stored.meta.name,
            generator: stored.meta.generator,
            modified: stored.meta.modified,
        };
        Ok(Database::from_parts(
            meta,
            root,
            passphrase.clone(),
            header.kdf,
            protection,
        ))
    }

    #[instrument(level = "debug", skip_all, fields(name = %database.meta.name))]
    fn encode(&self, database: &Database) -> Result<Vec<u8>, CodecError> {
        if database.has_unlocked_values() {
            return Err(CodecError::UnlockedValues);
        }
        let protection = database.protection();
        let stored = StoredBody {
            protection_id: protection.id(),
            protection_key: STANDARD.encode(protection.key().as_bytes()),
            meta: StoredMeta {
                name: database.meta.name.clone(),
                generator: database.meta.generator.clone(),
                modified: database.meta.modified,
            },
            root: group_to_stored(&database.root, protection.id())?,
        };
        let body = Zeroizing::new(serde_json::to_vec(&stored)?);
        drop(Zeroizing::new(stored.protection_key));

        let salt = generate_salt();
        let header = Header {
            kdf: *database.kdf_params(),
            salt,
        }
        .to_bytes();
        let key = derive_key(database.passphrase(), &salt, database.kdf_params())?;
        let envelope = seal(&key, &body, &header)?;

        let mut out = header;
        out.extend_from_slice(&envelope.to_bytes());
        Ok(out)
    }
}

fn group_from_stored(group: StoredGroup, owner: u64) -> Result<Group, CodecError> {
    Ok(Group {
        uuid: group.uuid,
        name: group.name,
        entries: group
            .entries
            .into_iter()
            .map(|entry| entry_from_stored(entry, owner))
            .collect::<Result<_, _>>()?,
        groups: group
            .groups
            .into_iter()
            .map(|group| group_from_stored(group, owner))
            .collect::<Result<_, _>>()?,
    })
}

fn entry_from_stored(entry: StoredEntry, owner: u64) -> Result<Entry, CodecError> {
    let fields = entry
        .fields
        .into_iter()
        .map(|field| -> Result<Field, CodecError> {
            let value = match (field.value, field.protected) {
                (Some(value), None) => FieldValue::Plain(value),
                (None, Some(sealed)) => {
                    let sealed = STANDARD
                        .decode(sealed.as_bytes())
                        .map_err(|_| CodecError::InvalidFormat("bad protected value"))?;
                    FieldValue::Protected(ProtectedValue::locked(owner, sealed))
                }
                _ => return Err(CodecError::InvalidFormat("field must hold exactly one value")),
            };
            Ok(Field {
                key: field.key,
                value,
            })
        })
        .collect::<Result<_, _>>()?;
    Ok(Entry {
        uuid: entry.uuid,
        fields,
        tags: entry.tags,
        times: EntryTimes {
            creation: entry.created,
            last_modification: entry.modified,
        },
        kdbx: None,
    })
}

fn group_to_stored(group: &Group, owner: u64) -> Result<StoredGroup, CodecError> {
    Ok(StoredGroup {
        uuid: group.uuid,
        name: group.name.clone(),
        entries: group
            .entries
            .iter()
            .map(|entry| entry_to_stored(entry, owner))
            .collect::<Result<_, _>>()?,
        groups: group
            .groups
            .iter()
            .map(|group| group_to_stored(group, owner))
            .collect::<Result<_, _>>()?,
    })
}

fn entry_to_stored(entry: &Entry, owner: u64) -> Result<StoredEntry, CodecError> {
    let fields = entry
        .fields
        .iter()
        .map(|field| -> Result<StoredField, CodecError> {
            let (value, protected) = match &field.value {
                FieldValue::Plain(value) => (Some(value.clone()), None),
                FieldValue::Protected(value) => match value.sealed() {
                    Some((sealed_by, _)) if sealed_by != owner => {
                        return Err(CodecError::ForeignProtectedValue)
                    }
                    Some((_, sealed)) => (None, Some(STANDARD.encode(sealed))),
                    None => return Err(CodecError::UnlockedValues),
                },
            };
            Ok(StoredField {
                key: field.key.clone(),
                value,
                protected,
            })
        })
        .collect::<Result<_, _>>()?;
    Ok(StoredEntry {
        uuid: entry.uuid,
        fields,
        tags: entry.tags.clone(),
        created: entry.times.creation,
        modified: entry.times.last_modification,
    })
}
