use std::path::PathBuf;

use keesync_crypto::Passphrase;

pub const DEFAULT_REMOTE_COPY_PREFIX: &str = "remote_copy";
pub const DEFAULT_SYNC_DB_NAME: &str = "tmp.kdbx";
pub const DEFAULT_BACKUP_DIR_NAME: &str = "backups";
pub const DEFAULT_REMOTE_BACKUP_FOLDER: &str = "Backups";

/// File locations and the shared passphrase for one sync round.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub directory: PathBuf,
    /// Name of the database file, both locally and on the remote.
    pub file_name: String,
    pub remote_copy_prefix: String,
    pub sync_db_name: String,
    pub backup_directory: PathBuf,
    pub remote_backup_folder: String,
    pub passphrase: Passphrase,
}

impl DatabaseSettings {
    #[must_use]
    pub fn new(
        directory: impl Into<PathBuf>,
        file_name: impl Into<String>,
        passphrase: Passphrase,
    ) -> Self {
        let directory = directory.into();
        Self {
            backup_directory: directory.join(DEFAULT_BACKUP_DIR_NAME),
            directory,
            file_name: file_name.into(),
            remote_copy_prefix: DEFAULT_REMOTE_COPY_PREFIX.to_owned(),
            sync_db_name: DEFAULT_SYNC_DB_NAME.to_owned(),
            remote_backup_folder: DEFAULT_REMOTE_BACKUP_FOLDER.to_owned(),
            passphrase,
        }
    }

    #[must_use]
    pub fn full_file_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    #[must_use]
    pub fn remote_copy_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}_{}", self.remote_copy_prefix, self.file_name))
    }

    #[must_use]
    pub fn sync_file_path(&self) -> PathBuf {
        self.directory.join(&self.sync_db_name)
    }
}
