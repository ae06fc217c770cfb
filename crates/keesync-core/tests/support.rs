#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use keesync_core::{
    Database, DatabaseCodec, DatabaseSettings, Entry, FieldValue, KdfParams, LocalMirrorStorage,
    Passphrase, VaultCodec, PASSWORD_FIELD, TITLE_FIELD,
};
use tempfile::TempDir;
use uuid::Uuid;

pub const PASSPHRASE: &str = "correct horse battery staple";
pub const FILE_NAME: &str = "vault.kdbx";

pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("keesync_core=debug"))
            .with_test_writer()
            .try_init();
    });
}

pub fn cheap_kdf() -> KdfParams {
    KdfParams {
        memory_kb: 64,
        iterations: 1,
        parallelism: 1,
    }
}

pub fn at(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

pub fn entry(id: u128, title: &str, modified: Option<DateTime<Utc>>) -> Entry {
    Entry::with_uuid(Uuid::from_u128(id))
        .with_field(TITLE_FIELD, FieldValue::plain(title))
        .with_field(PASSWORD_FIELD, FieldValue::protected(format!("{title} password")))
        .modified_at(modified)
}

pub fn encode(entries: Vec<Entry>, passphrase: &str) -> Vec<u8> {
    let mut db = Database::new("vault", Passphrase::new(passphrase), cheap_kdf());
    db.set_entries(entries);
    db.lock_protected().expect("lock");
    VaultCodec.encode(&db).expect("encode")
}

pub fn decode_unlocked(path: &Path, passphrase: &str) -> Database {
    let bytes = fs::read(path).expect("read database");
    let mut db = VaultCodec
        .decode(&bytes, &Passphrase::new(passphrase))
        .expect("decode");
    db.unlock_protected().expect("unlock");
    db
}

pub fn titles(db: &Database) -> Vec<String> {
    let mut titles: Vec<String> = db
        .entries()
        .iter()
        .filter_map(|entry| entry.title().map(str::to_owned))
        .collect();
    titles.sort();
    titles
}

/// A local database directory plus a mirror directory acting as the remote.
pub struct Fixture {
    _dir: TempDir,
    pub local_dir: PathBuf,
    pub remote_dir: PathBuf,
    pub settings: DatabaseSettings,
    pub remote: LocalMirrorStorage,
}

impl Fixture {
    pub fn new(local: Vec<Entry>, remote: Vec<Entry>) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("tempdir");
        let local_dir = dir.path().join("local");
        let remote_dir = dir.path().join("remote");
        fs::create_dir_all(&local_dir).expect("local dir");
        fs::create_dir_all(remote_dir.join("Backups")).expect("remote dir");

        fs::write(local_dir.join(FILE_NAME), encode(local, PASSPHRASE)).expect("local db");
        fs::write(remote_dir.join(FILE_NAME), encode(remote, PASSPHRASE)).expect("remote db");

        let settings = DatabaseSettings::new(&local_dir, FILE_NAME, Passphrase::new(PASSPHRASE));
        let remote = LocalMirrorStorage::new(&remote_dir);
        Self {
            _dir: dir,
            local_dir,
            remote_dir,
            settings,
            remote,
        }
    }

    pub fn local_path(&self) -> PathBuf {
        self.settings.full_file_path()
    }

    pub fn remote_path(&self) -> PathBuf {
        self.remote_dir.join(FILE_NAME)
    }

    pub fn remote_backups(&self) -> Vec<PathBuf> {
        let mut names: Vec<PathBuf> = fs::read_dir(self.remote_dir.join("Backups"))
            .expect("list")
            .map(|item| item.expect("item").path())
            .collect();
        names.sort();
        names
    }
}
