//! KeePass KDBX files through the `keepass` crate.
//!
//! Only the entries held directly by the root group take part in a merge.
//! Everything else in the file (subgroups, metadata, deleted objects, entry
//! history and attachments) rides along in the decoded [`Database`] and is
//! written back unchanged.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use keepass::config::DatabaseConfig;
use keepass::db::{Entry as NativeEntry, Group as NativeGroup, Node, Value};
use keepass::error::DatabaseOpenError;
use keepass::DatabaseKey;
use keesync_crypto::{KdfParams, Passphrase};
use secstr::SecStr;
use tracing::{debug, instrument};

use crate::codec::{CodecError, DatabaseCodec, VaultCodec, FILE_MAGIC};
use crate::model::{
    Database, DatabaseMeta, Entry, EntryTimes, Field, FieldValue, Group, ProtectedValue,
    ProtectionKey,
};

/// First eight bytes of every KDBX file.
pub const KDBX_SIGNATURE: [u8; 8] = [0x03, 0xD9, 0xA2, 0x9A, 0x67, 0xFB, 0x4B, 0xB5];

const GENERATOR: &str = "KeePass (KDBX)";

/// The parsed KDBX document minus the root entries.
#[derive(Clone)]
pub(crate) struct KdbxDocument(Arc<Mutex<keepass::Database>>);

impl std::fmt::Debug for KdbxDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KdbxDocument(..)")
    }
}

/// Entry data the model does not carry: history, icons, auto-type, binaries.
#[derive(Clone)]
pub(crate) struct KdbxEntry(Box<NativeEntry>);

impl std::fmt::Debug for KdbxEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KdbxEntry(..)")
    }
}

/// Reads and writes KeePass KDBX databases.
///
/// A database not decoded from a KDBX file is written as a fresh KDBX 4 file
/// with the crate's default settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct KdbxCodec;

fn database_key(passphrase: &Passphrase) -> DatabaseKey {
    DatabaseKey::new().with_password(passphrase.expose())
}

fn open_error(err: DatabaseOpenError) -> CodecError {
    match err {
        DatabaseOpenError::Key(_) => CodecError::WrongPassphrase,
        other => CodecError::Kdbx(other.to_string()),
    }
}

fn utc(at: &NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(at)
}

impl DatabaseCodec for KdbxCodec {
    #[instrument(level = "debug", skip_all, fields(bytes_len = bytes.len()))]
    fn decode(&self, bytes: &[u8], passphrase: &Passphrase) -> Result<Database, CodecError> {
        let mut document =
            keepass::Database::open(&mut Cursor::new(bytes), database_key(passphrase))
                .map_err(open_error)?;
        let protection = ProtectionKey::generate();

        let mut entries = Vec::new();
        for node in &document.root.children {
            if let Node::Entry(entry) = node {
                entries.push(entry_from_kdbx(entry, &protection)?);
            }
        }
        document
            .root
            .children
            .retain(|node| !matches!(node, Node::Entry(_)));
        debug!(entries = entries.len(), "kdbx root entries loaded");

        let root = Group {
            uuid: document.root.uuid,
            name: document.root.name.clone(),
            entries,
            groups: Vec::new(),
        };
        let meta = DatabaseMeta {
            name: root.name.clone(),
            generator: GENERATOR.to_owned(),
            modified: None,
        };
        let database = Database::from_parts(
            meta,
            root,
            passphrase.clone(),
            KdfParams::default(),
            protection,
        );
        Ok(database.with_kdbx(KdbxDocument(Arc::new(Mutex::new(document)))))
    }

    #[instrument(level = "debug", skip_all, fields(name = %database.meta.name))]
    fn encode(&self, database: &Database) -> Result<Vec<u8>, CodecError> {
        if database.has_unlocked_values() {
            return Err(CodecError::UnlockedValues);
        }
        let protection = database.protection();
        let entries = database
            .entries()
            .iter()
            .map(|entry| entry_to_kdbx(entry, protection).map(Node::Entry))
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::new();
        match database.kdbx() {
            Some(KdbxDocument(shared)) => {
                let mut document = shared
                    .lock()
                    .map_err(|_| CodecError::Kdbx("document lock poisoned".to_owned()))?;
                // KeePass lists a group's entries before its subgroups.
                let groups = std::mem::take(&mut document.root.children);
                document.root.children = entries;
                document.root.children.extend(groups);
                let saved = document.save(&mut out, database_key(database.passphrase()));
                document
                    .root
                    .children
                    .retain(|node| !matches!(node, Node::Entry(_)));
                saved.map_err(|err| CodecError::Kdbx(err.to_string()))?;
            }
            None => {
                let mut document = keepass::Database::new(DatabaseConfig::default());
                document.root = NativeGroup::new(&database.root.name);
                document.root.uuid = database.root.uuid;
                document.root.children = entries;
                for group in &database.root.groups {
                    document
                        .root
                        .children
                        .push(Node::Group(group_to_kdbx(group, protection)?));
                }
                document
                    .save(&mut out, database_key(database.passphrase()))
                    .map_err(|err| CodecError::Kdbx(err.to_string()))?;
            }
        }
        Ok(out)
    }
}

fn entry_from_kdbx(entry: &NativeEntry, protection: &ProtectionKey) -> Result<Entry, CodecError> {
    let mut native: Vec<(&String, &Value)> = entry.fields.iter().collect();
    native.sort_by(|a, b| a.0.cmp(b.0));

    let mut fields = Vec::with_capacity(native.len());
    for (key, value) in native {
        let value = match value {
            Value::Unprotected(text) => FieldValue::Plain(text.clone()),
            Value::Protected(secret) => {
                let text = std::str::from_utf8(secret.unsecure())
                    .map_err(|_| CodecError::InvalidFormat("protected value is not valid UTF-8"))?;
                let mut value = ProtectedValue::unlocked(text);
                value.lock(protection)?;
                FieldValue::Protected(value)
            }
            _ => continue,
        };
        fields.push(Field {
            key: key.clone(),
            value,
        });
    }

    let mut carried = entry.clone();
    carried
        .fields
        .retain(|_, value| !matches!(value, Value::Unprotected(_) | Value::Protected(_)));
    Ok(Entry {
        uuid: entry.uuid,
        fields,
        tags: entry.tags.clone(),
        times: EntryTimes {
            creation: entry.times.get_creation().map(utc),
            last_modification: entry.times.get_last_modification().map(utc),
        },
        kdbx: Some(KdbxEntry(Box::new(carried))),
    })
}

fn entry_to_kdbx(entry: &Entry, protection: &ProtectionKey) -> Result<NativeEntry, CodecError> {
    let mut out = match &entry.kdbx {
        Some(KdbxEntry(native)) => (**native).clone(),
        None => NativeEntry::new(),
    };
    out.uuid = entry.uuid;
    out.tags.clone_from(&entry.tags);
    out.fields
        .retain(|_, value| !matches!(value, Value::Unprotected(_) | Value::Protected(_)));
    for field in &entry.fields {
        let value = match &field.value {
            FieldValue::Plain(text) => Value::Unprotected(text.clone()),
            FieldValue::Protected(sealed) => {
                let mut open = sealed.clone();
                open.unlock(protection)?;
                let text = open.reveal().ok_or(CodecError::UnlockedValues)?;
                Value::Protected(SecStr::new(text.as_bytes().to_vec()))
            }
        };
        out.fields.insert(field.key.clone(), value);
    }
    if let Some(at) = entry.times.creation {
        out.times.set_creation(at.naive_utc());
    }
    if let Some(at) = entry.times.last_modification {
        out.times.set_last_modification(at.naive_utc());
    }
    Ok(out)
}

fn group_to_kdbx(group: &Group, protection: &ProtectionKey) -> Result<NativeGroup, CodecError> {
    let mut out = NativeGroup::new(&group.name);
    out.uuid = group.uuid;
    for entry in &group.entries {
        out.children
            .push(Node::Entry(entry_to_kdbx(entry, protection)?));
    }
    for child in &group.groups {
        out.children
            .push(Node::Group(group_to_kdbx(child, protection)?));
    }
    Ok(out)
}

/// Picks the codec from the file signature when decoding and from the
/// database's origin when encoding, so KDBX and keesync files both sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoCodec;

impl DatabaseCodec for AutoCodec {
    fn decode(&self, bytes: &[u8], passphrase: &Passphrase) -> Result<Database, CodecError> {
        if bytes.starts_with(&FILE_MAGIC) {
            VaultCodec.decode(bytes, passphrase)
        } else if bytes.starts_with(&KDBX_SIGNATURE) {
            KdbxCodec.decode(bytes, passphrase)
        } else {
            Err(CodecError::InvalidFormat("unknown file signature"))
        }
    }

    fn encode(&self, database: &Database) -> Result<Vec<u8>, CodecError> {
        if database.is_kdbx() {
            KdbxCodec.encode(database)
        } else {
            VaultCodec.encode(database)
        }
    }
}
