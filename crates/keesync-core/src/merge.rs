//! Three-way entry reconciliation between the local database, the freshly
//! downloaded remote copy and the scratch output that becomes the new local
//! file.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use keesync_crypto::Passphrase;
use thiserror::Error;
use tracing::{debug, info};

use crate::codec::{CodecError, DatabaseCodec};
use crate::fsutil::write_synced;
use crate::model::{Database, Entry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseRole {
    Local,
    RemoteCopy,
    SyncOutput,
}

impl fmt::Display for DatabaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::RemoteCopy => "remote copy",
            Self::SyncOutput => "sync output",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("can't initialize {role} database")]
    Initialize {
        role: DatabaseRole,
        #[source]
        source: CodecError,
    },
    #[error("can't unlock protected values of {role} database")]
    Unlock {
        role: DatabaseRole,
        #[source]
        source: CodecError,
    },
    #[error("can't encode sync output database")]
    Encode(#[source] CodecError),
    #[error("can't save sync output database to {path}")]
    Save {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MergeError {
    /// True when the failure comes from the inputs (passphrase or file content)
    /// rather than from writing the result.
    #[must_use]
    pub const fn is_input(&self) -> bool {
        matches!(self, Self::Initialize { .. } | Self::Unlock { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub common: usize,
    pub local_only: usize,
    pub remote_only: usize,
    /// Common entries where the remote version replaced the local one.
    pub remote_wins: usize,
}

impl MergeStats {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.common + self.local_only + self.remote_only
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub entries: Vec<Entry>,
    pub stats: MergeStats,
}

/// Whole-entry last-writer-wins: the remote version is taken only when both
/// sides carry a modification time and the remote one is strictly later.
#[must_use]
pub fn remote_is_newer(local: &Entry, remote: &Entry) -> bool {
    match (local.times.last_modification, remote.times.last_modification) {
        (Some(local_at), Some(remote_at)) => remote_at > local_at,
        _ => false,
    }
}

/// Union of both entry sets keyed by UUID.
///
/// Output is `[common] + [local only] + [remote only]`. Within each group the
/// order follows first appearance in the source list. A UUID repeated inside
/// one source resolves to its last occurrence there.
#[must_use]
pub fn merge_entries(local: &[Entry], remote: &[Entry]) -> MergeOutcome {
    let (local_order, local_map) = index_entries(local);
    let (remote_order, remote_map) = index_entries(remote);

    let mut stats = MergeStats::default();
    let mut common = Vec::new();
    let mut local_only = Vec::new();
    for id in &local_order {
        let local_entry = local_map[id.as_str()];
        match remote_map.get(id.as_str()) {
            Some(remote_entry) => {
                stats.common += 1;
                if remote_is_newer(local_entry, remote_entry) {
                    stats.remote_wins += 1;
                    common.push((*remote_entry).clone());
                } else {
                    common.push(local_entry.clone());
                }
            }
            None => {
                stats.local_only += 1;
                local_only.push(local_entry.clone());
            }
        }
    }

    let mut remote_only = Vec::new();
    for id in &remote_order {
        if !local_map.contains_key(id.as_str()) {
            stats.remote_only += 1;
            remote_only.push(remote_map[id.as_str()].clone());
        }
    }

    let mut entries = common;
    entries.append(&mut local_only);
    entries.append(&mut remote_only);
    MergeOutcome { entries, stats }
}

fn index_entries(entries: &[Entry]) -> (Vec<String>, HashMap<String, &Entry>) {
    let mut order = Vec::with_capacity(entries.len());
    let mut seen = HashSet::with_capacity(entries.len());
    let mut map = HashMap::with_capacity(entries.len());
    for entry in entries {
        let id = entry.identity();
        if seen.insert(id.clone()) {
            order.push(id.clone());
        }
        map.insert(id, entry);
    }
    (order, map)
}

/// The three database handles live during one sync round.
///
/// Protected values of `local` and `remote_copy` are unlocked on open; every
/// decrypted buffer is zeroed when the handle is dropped.
#[derive(Debug)]
pub struct DatabaseSync {
    local: Database,
    remote_copy: Database,
    scratch: Database,
}

impl DatabaseSync {
    pub fn open(
        codec: &dyn DatabaseCodec,
        passphrase: &Passphrase,
        local: &[u8],
        remote_copy: &[u8],
        scratch: &[u8],
    ) -> Result<Self, MergeError> {
        let local = open_unlocked(codec, passphrase, local, DatabaseRole::Local)?;
        let remote_copy = open_unlocked(codec, passphrase, remote_copy, DatabaseRole::RemoteCopy)?;
        let scratch = codec
            .decode(scratch, passphrase)
            .map_err(|source| MergeError::Initialize {
                role: DatabaseRole::SyncOutput,
                source,
            })?;
        Ok(Self {
            local,
            remote_copy,
            scratch,
        })
    }

    #[must_use]
    pub const fn local(&self) -> &Database {
        &self.local
    }

    #[must_use]
    pub const fn remote_copy(&self) -> &Database {
        &self.remote_copy
    }

    #[must_use]
    pub const fn scratch(&self) -> &Database {
        &self.scratch
    }

    /// Replaces the scratch root entries with the merge of local and remote.
    pub fn merge(&mut self) -> MergeStats {
        let outcome = merge_entries(self.local.entries(), self.remote_copy.entries());
        info!(
            common = outcome.stats.common,
            local_only = outcome.stats.local_only,
            remote_only = outcome.stats.remote_only,
            remote_wins = outcome.stats.remote_wins,
            "entries merged"
        );
        self.scratch.set_entries(outcome.entries);
        outcome.stats
    }

    /// Locks the scratch database, encodes it and writes it durably to `path`.
    pub fn save(&mut self, codec: &dyn DatabaseCodec, path: &Path) -> Result<(), MergeError> {
        self.scratch.lock_protected().map_err(MergeError::Encode)?;
        let bytes = codec.encode(&self.scratch).map_err(MergeError::Encode)?;
        write_synced(path, &bytes).map_err(|source| MergeError::Save {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "sync output saved");
        Ok(())
    }
}

fn open_unlocked(
    codec: &dyn DatabaseCodec,
    passphrase: &Passphrase,
    bytes: &[u8],
    role: DatabaseRole,
) -> Result<Database, MergeError> {
    let mut database = codec
        .decode(bytes, passphrase)
        .map_err(|source| MergeError::Initialize { role, source })?;
    database
        .unlock_protected()
        .map_err(|source| MergeError::Unlock { role, source })?;
    Ok(database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    use crate::model::{FieldValue, TITLE_FIELD};

    fn at(seconds: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(seconds, 0).single()
    }

    fn entry(id: u128, title: &str, modified: Option<DateTime<Utc>>) -> Entry {
        Entry::with_uuid(Uuid::from_u128(id))
            .with_field(TITLE_FIELD, FieldValue::plain(title))
            .modified_at(modified)
    }

    fn titles(entries: &[Entry]) -> Vec<&str> {
        entries.iter().filter_map(Entry::title).collect()
    }

    #[test]
    fn later_remote_wins_and_singletons_carry_through() {
        let local = vec![entry(1, "A local", at(10)), entry(2, "B", at(5))];
        let remote = vec![entry(1, "A remote", at(20)), entry(3, "C", at(1))];

        let outcome = merge_entries(&local, &remote);

        assert_eq!(titles(&outcome.entries), vec!["A remote", "B", "C"]);
        assert_eq!(
            outcome.stats,
            MergeStats {
                common: 1,
                local_only: 1,
                remote_only: 1,
                remote_wins: 1,
            }
        );
        assert_eq!(outcome.stats.total(), 3);
    }

    #[test]
    fn missing_timestamp_falls_back_to_local() {
        let local = vec![entry(1, "A local", None)];
        let remote = vec![entry(1, "A remote", at(5))];
        let outcome = merge_entries(&local, &remote);
        assert_eq!(titles(&outcome.entries), vec!["A local"]);

        let local = vec![entry(1, "A local", at(5))];
        let remote = vec![entry(1, "A remote", None)];
        let outcome = merge_entries(&local, &remote);
        assert_eq!(titles(&outcome.entries), vec!["A local"]);
    }

    #[test]
    fn equal_timestamps_keep_local() {
        let local = vec![entry(1, "A local", at(7))];
        let remote = vec![entry(1, "A remote", at(7))];
        let outcome = merge_entries(&local, &remote);
        assert_eq!(titles(&outcome.entries), vec!["A local"]);
        assert_eq!(outcome.stats.remote_wins, 0);
    }

    #[test]
    fn older_remote_loses() {
        let local = vec![entry(1, "A local", at(30))];
        let remote = vec![entry(1, "A remote", at(20))];
        let outcome = merge_entries(&local, &remote);
        assert_eq!(titles(&outcome.entries), vec!["A local"]);
    }

    #[test]
    fn empty_sides_merge_to_the_other_side() {
        let remote = vec![entry(1, "A", at(1)), entry(2, "B", at(2))];
        let outcome = merge_entries(&[], &remote);
        assert_eq!(titles(&outcome.entries), vec!["A", "B"]);
        assert_eq!(outcome.stats.remote_only, 2);

        let outcome = merge_entries(&remote, &[]);
        assert_eq!(outcome.stats.local_only, 2);
        assert!(merge_entries(&[], &[]).entries.is_empty());
    }

    #[test]
    fn duplicate_uuid_within_one_side_is_emitted_once() {
        let local = vec![entry(1, "first", at(1)), entry(1, "second", at(2))];
        let outcome = merge_entries(&local, &[]);
        assert_eq!(titles(&outcome.entries), vec!["second"]);
    }

    #[test]
    fn merge_error_classifies_inputs() {
        let err = MergeError::Initialize {
            role: DatabaseRole::RemoteCopy,
            source: CodecError::WrongPassphrase,
        };
        assert!(err.is_input());
        assert_eq!(err.to_string(), "can't initialize remote copy database");

        let err = MergeError::Save {
            path: PathBuf::from("/tmp/x"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(!err.is_input());
    }
}
