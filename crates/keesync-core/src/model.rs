use chrono::{DateTime, Utc};
use keesync_crypto::{open, seal, Envelope, KdfParams, Passphrase, SecretKey};
use rand::RngCore;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::codec::CodecError;
use crate::kdbx::{KdbxDocument, KdbxEntry};

pub const TITLE_FIELD: &str = "Title";
pub const USERNAME_FIELD: &str = "UserName";
pub const PASSWORD_FIELD: &str = "Password";

const PROTECTED_AAD_PREFIX: &[u8] = b"keesync:protected:v1:";

/// Per-database key used to keep protected field values encrypted in memory.
///
/// A database decoded from a copy of another file shares that file's key and
/// id, so entries can move between the two without re-encryption.
#[derive(Clone)]
pub struct ProtectionKey {
    id: u64,
    key: SecretKey,
}

impl ProtectionKey {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: rand::rngs::OsRng.next_u64(),
            key: SecretKey::generate(),
        }
    }

    #[must_use]
    pub const fn new(id: u64, key: SecretKey) -> Self {
        Self { id, key }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn key(&self) -> &SecretKey {
        &self.key
    }

    fn aad(&self) -> Vec<u8> {
        let mut aad = PROTECTED_AAD_PREFIX.to_vec();
        aad.extend_from_slice(&self.id.to_le_bytes());
        aad
    }
}

impl std::fmt::Debug for ProtectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionKey")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
enum ProtectedState {
    Unlocked(Zeroizing<String>),
    Locked { owner: u64, sealed: Vec<u8> },
}

/// A field value that is kept sealed while the database is locked.
#[derive(Clone)]
pub struct ProtectedValue {
    state: ProtectedState,
}

impl ProtectedValue {
    #[must_use]
    pub fn unlocked(value: impl Into<String>) -> Self {
        Self {
            state: ProtectedState::Unlocked(Zeroizing::new(value.into())),
        }
    }

    #[must_use]
    pub(crate) const fn locked(owner: u64, sealed: Vec<u8>) -> Self {
        Self {
            state: ProtectedState::Locked { owner, sealed },
        }
    }

    #[must_use]
    pub const fn is_locked(&self) -> bool {
        matches!(self.state, ProtectedState::Locked { .. })
    }

    /// Plaintext, if unlocked.
    #[must_use]
    pub fn reveal(&self) -> Option<&str> {
        match &self.state {
            ProtectedState::Unlocked(value) => Some(value.as_str()),
            ProtectedState::Locked { .. } => None,
        }
    }

    pub(crate) fn sealed(&self) -> Option<(u64, &[u8])> {
        match &self.state {
            ProtectedState::Locked { owner, sealed } => Some((*owner, sealed)),
            ProtectedState::Unlocked(_) => None,
        }
    }

    pub fn lock(&mut self, protection: &ProtectionKey) -> Result<(), CodecError> {
        match &self.state {
            ProtectedState::Locked { owner, .. } if *owner == protection.id() => Ok(()),
            ProtectedState::Locked { .. } => Err(CodecError::ForeignProtectedValue),
            ProtectedState::Unlocked(value) => {
                let envelope = seal(protection.key(), value.as_bytes(), &protection.aad())?;
                self.state = ProtectedState::Locked {
                    owner: protection.id(),
                    sealed: envelope.to_bytes(),
                };
                Ok(())
            }
        }
    }

    pub fn unlock(&mut self, protection: &ProtectionKey) -> Result<(), CodecError> {
        let ProtectedState::Locked { owner, sealed } = &self.state else {
            return Ok(());
        };
        if *owner != protection.id() {
            return Err(CodecError::ForeignProtectedValue);
        }
        let envelope = Envelope::from_bytes(sealed)?;
        let plain = Zeroizing::new(open(protection.key(), &envelope, &protection.aad())?);
        let value = std::str::from_utf8(&plain)
            .map_err(|_| CodecError::InvalidFormat("protected value is not valid UTF-8"))?;
        self.state = ProtectedState::Unlocked(Zeroizing::new(value.to_owned()));
        Ok(())
    }
}

impl std::fmt::Debug for ProtectedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state {
            ProtectedState::Unlocked(_) => write!(f, "ProtectedValue(UNLOCKED, REDACTED)"),
            ProtectedState::Locked { owner, .. } => write!(f, "ProtectedValue(LOCKED by {owner})"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FieldValue {
    Plain(String),
    Protected(ProtectedValue),
}

impl FieldValue {
    #[must_use]
    pub fn plain(value: impl Into<String>) -> Self {
        Self::Plain(value.into())
    }

    #[must_use]
    pub fn protected(value: impl Into<String>) -> Self {
        Self::Protected(ProtectedValue::unlocked(value))
    }

    /// Readable text of the value; `None` for a protected value that is locked.
    #[must_use]
    pub fn reveal(&self) -> Option<&str> {
        match self {
            Self::Plain(value) => Some(value),
            Self::Protected(value) => value.reveal(),
        }
    }

    #[must_use]
    pub const fn is_protected(&self) -> bool {
        matches!(self, Self::Protected(_))
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub key: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryTimes {
    pub creation: Option<DateTime<Utc>>,
    pub last_modification: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub uuid: Uuid,
    pub fields: Vec<Field>,
    pub tags: Vec<String>,
    pub times: EntryTimes,
    pub(crate) kdbx: Option<KdbxEntry>,
}

impl Entry {
    /// A fresh entry stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::now_v7(),
            fields: Vec::new(),
            tags: Vec::new(),
            times: EntryTimes {
                creation: Some(now),
                last_modification: Some(now),
            },
            kdbx: None,
        }
    }

    #[must_use]
    pub fn with_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.set_field(key, value);
        self
    }

    #[must_use]
    pub fn modified_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.times.last_modification = at;
        self
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: FieldValue) {
        let key = key.into();
        match self.fields.iter_mut().find(|field| field.key == key) {
            Some(field) => field.value = value,
            None => self.fields.push(Field { key, value }),
        }
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|field| field.key == key)
            .map(|field| &field.value)
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.field(TITLE_FIELD).and_then(FieldValue::reveal)
    }

    pub fn touch(&mut self) {
        self.times.last_modification = Some(Utc::now());
    }

    /// Canonical identity used when matching entries across databases.
    #[must_use]
    pub fn identity(&self) -> String {
        self.uuid.simple().to_string()
    }

    fn protected_values_mut(&mut self) -> impl Iterator<Item = &mut ProtectedValue> {
        self.fields.iter_mut().filter_map(|field| match &mut field.value {
            FieldValue::Protected(value) => Some(value),
            FieldValue::Plain(_) => None,
        })
    }

    fn has_unlocked_values(&self) -> bool {
        self.fields.iter().any(|field| match &field.value {
            FieldValue::Protected(value) => !value.is_locked(),
            FieldValue::Plain(_) => false,
        })
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Group {
    pub uuid: Uuid,
    pub name: String,
    pub entries: Vec<Entry>,
    pub groups: Vec<Group>,
}

impl Group {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::now_v7(),
            name: name.into(),
            entries: Vec::new(),
            groups: Vec::new(),
        }
    }

    fn for_each_entry_mut<E>(
        &mut self,
        f: &mut impl FnMut(&mut Entry) -> Result<(), E>,
    ) -> Result<(), E> {
        for entry in &mut self.entries {
            f(entry)?;
        }
        for group in &mut self.groups {
            group.for_each_entry_mut(f)?;
        }
        Ok(())
    }

    fn any_entry(&self, f: &impl Fn(&Entry) -> bool) -> bool {
        self.entries.iter().any(f) || self.groups.iter().any(|group| group.any_entry(f))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseMeta {
    pub name: String,
    pub generator: String,
    pub modified: Option<DateTime<Utc>>,
}

/// An opened database: its group tree plus what is needed to write it back.
#[derive(Debug, Clone)]
pub struct Database {
    pub meta: DatabaseMeta,
    pub root: Group,
    passphrase: Passphrase,
    kdf: KdfParams,
    protection: ProtectionKey,
    kdbx: Option<KdbxDocument>,
}

impl Database {
    #[must_use]
    pub fn new(name: impl Into<String>, passphrase: Passphrase, kdf: KdfParams) -> Self {
        let name = name.into();
        Self {
            meta: DatabaseMeta {
                name: name.clone(),
                generator: concat!("keesync ", env!("CARGO_PKG_VERSION")).to_owned(),
                modified: Some(Utc::now()),
            },
            root: Group::new(name),
            passphrase,
            kdf,
            protection: ProtectionKey::generate(),
            kdbx: None,
        }
    }

    pub(crate) const fn from_parts(
        meta: DatabaseMeta,
        root: Group,
        passphrase: Passphrase,
        kdf: KdfParams,
        protection: ProtectionKey,
    ) -> Self {
        Self {
            meta,
            root,
            passphrase,
            kdf,
            protection,
            kdbx: None,
        }
    }

    pub(crate) fn with_kdbx(mut self, document: KdbxDocument) -> Self {
        self.kdbx = Some(document);
        self
    }

    pub(crate) const fn kdbx(&self) -> Option<&KdbxDocument> {
        self.kdbx.as_ref()
    }

    /// Whether this database was decoded from a KeePass KDBX file.
    #[must_use]
    pub const fn is_kdbx(&self) -> bool {
        self.kdbx.is_some()
    }

    #[must_use]
    pub const fn passphrase(&self) -> &Passphrase {
        &self.passphrase
    }

    #[must_use]
    pub const fn kdf_params(&self) -> &KdfParams {
        &self.kdf
    }

    #[must_use]
    pub const fn protection(&self) -> &ProtectionKey {
        &self.protection
    }

    /// Entries held directly by the root group.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.root.entries
    }

    pub fn set_entries(&mut self, entries: Vec<Entry>) {
        self.root.entries = entries;
    }

    pub fn unlock_protected(&mut self) -> Result<(), CodecError> {
        let protection = self.protection.clone();
        self.root.for_each_entry_mut(&mut |entry| {
            for value in entry.protected_values_mut() {
                value.unlock(&protection)?;
            }
            Ok(())
        })
    }

    pub fn lock_protected(&mut self) -> Result<(), CodecError> {
        let protection = self.protection.clone();
        self.root.for_each_entry_mut(&mut |entry| {
            for value in entry.protected_values_mut() {
                value.lock(&protection)?;
            }
            Ok(())
        })
    }

    #[must_use]
    pub fn has_unlocked_values(&self) -> bool {
        self.root.any_entry(&Entry::has_unlocked_values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_kdf() -> KdfParams {
        KdfParams {
            memory_kb: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn lock_and_unlock_restore_the_plaintext() {
        let protection = ProtectionKey::generate();
        let mut value = ProtectedValue::unlocked("hunter2");
        value.lock(&protection).expect("lock");
        assert!(value.is_locked());
        assert_eq!(value.reveal(), None);
        value.unlock(&protection).expect("unlock");
        assert_eq!(value.reveal(), Some("hunter2"));
    }

    #[test]
    fn foreign_key_cannot_unlock_or_relock() {
        let owner = ProtectionKey::generate();
        let stranger = ProtectionKey::generate();
        let mut value = ProtectedValue::unlocked("hunter2");
        value.lock(&owner).expect("lock");

        assert!(matches!(
            value.clone().unlock(&stranger),
            Err(CodecError::ForeignProtectedValue)
        ));
        assert!(matches!(
            value.lock(&stranger),
            Err(CodecError::ForeignProtectedValue)
        ));
    }

    #[test]
    fn database_lock_covers_nested_groups() {
        let mut db = Database::new("vault", Passphrase::new("pw"), cheap_kdf());
        let mut nested = Group::new("nested");
        nested
            .entries
            .push(Entry::new().with_field(PASSWORD_FIELD, FieldValue::protected("deep")));
        db.root.groups.push(nested);
        db.root
            .entries
            .push(Entry::new().with_field(PASSWORD_FIELD, FieldValue::protected("top")));

        assert!(db.has_unlocked_values());
        db.lock_protected().expect("lock");
        assert!(!db.has_unlocked_values());
        db.unlock_protected().expect("unlock");
        assert_eq!(
            db.root.groups[0].entries[0]
                .field(PASSWORD_FIELD)
                .and_then(FieldValue::reveal),
            Some("deep")
        );
    }

    #[test]
    fn set_field_replaces_existing_key() {
        let mut entry = Entry::new().with_field(TITLE_FIELD, FieldValue::plain("old"));
        entry.set_field(TITLE_FIELD, FieldValue::plain("new"));
        assert_eq!(entry.fields.len(), 1);
        assert_eq!(entry.title(), Some("new"));
    }

    #[test]
    fn protected_debug_output_is_redacted() {
        let value = FieldValue::protected("hunter2");
        assert!(!format!("{value:?}").contains("hunter2"));
    }
}
