use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{error, info, warn};

use super::error::{PromoteStep, StageError, SyncError, SyncStage};
use super::REMOTE_BACKUP_TIME_FORMAT;
use crate::backup::{latest_backup, take_backup, Snapshot};
use crate::checksum::equal_content;
use crate::codec::DatabaseCodec;
use crate::fsutil::{sync_directory, write_synced};
use crate::merge::{DatabaseSync, MergeStats};
use crate::settings::DatabaseSettings;
use crate::storage::{RemoteFile, RemoteStorage};

/// Result of the two backup states on their own.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub local_backup: PathBuf,
    pub remote_backup: RemoteFile,
}

/// Summary of a completed round.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub local_backup: PathBuf,
    pub remote_backup: RemoteFile,
    /// Snapshot that was compared against the local file before promotion.
    pub verified_backup: PathBuf,
    pub merge: MergeStats,
}

/// Evidence that the latest backup matched the local database.
///
/// Only [`check_latest_backup`] produces one and [`SyncRound::promote`]
/// consumes it, so promotion cannot run without a fresh check.
#[derive(Debug)]
pub struct VerifiedBackup {
    snapshot: Snapshot,
    original: PathBuf,
}

impl VerifiedBackup {
    #[must_use]
    pub const fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

/// One backup, merge, promote and upload cycle.
///
/// Stages run strictly in order; the first failure ends the round and nothing
/// is rolled back.
pub struct SyncRound<'a> {
    settings: &'a DatabaseSettings,
    codec: &'a dyn DatabaseCodec,
    remote: &'a dyn RemoteStorage,
}

fn stage_failed(stage: SyncStage, source: impl Into<StageError>) -> SyncError {
    let err = SyncError::new(stage, source);
    error!(stage = %stage, error = %err.source, "sync stage failed");
    err
}

impl<'a> SyncRound<'a> {
    pub fn new(
        settings: &'a DatabaseSettings,
        codec: &'a dyn DatabaseCodec,
        remote: &'a dyn RemoteStorage,
    ) -> Self {
        Self {
            settings,
            codec,
            remote,
        }
    }

    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        info!(file = %self.settings.file_name, "sync round started");
        let local_backup = self.backup_local()?;
        let remote_backup = self.backup_remote().await?;
        self.download_remote().await?;
        let merge = self.merge()?;
        let verified = self.verify_backup()?;
        let verified_backup = verified.snapshot().path.clone();
        self.promote(verified)?;
        self.upload_remote().await?;
        info!(file = %self.settings.file_name, "sync round finished");
        Ok(SyncReport {
            local_backup,
            remote_backup,
            verified_backup,
            merge,
        })
    }

    /// Only the two backup states, without touching either database.
    pub async fn backup(&self) -> Result<BackupReport, SyncError> {
        let local_backup = self.backup_local()?;
        let remote_backup = self.backup_remote().await?;
        Ok(BackupReport {
            local_backup,
            remote_backup,
        })
    }

    pub fn backup_local(&self) -> Result<PathBuf, SyncError> {
        info!(stage = %SyncStage::BackupLocal, "backing up local database");
        let path = take_backup(
            &self.settings.full_file_path(),
            &self.settings.backup_directory,
            &self.settings.file_name,
        )
        .map_err(|err| stage_failed(SyncStage::BackupLocal, err))?;
        info!(backup = %path.display(), "local backup created");
        Ok(path)
    }

    pub async fn backup_remote(&self) -> Result<RemoteFile, SyncError> {
        info!(stage = %SyncStage::BackupRemote, "backing up remote database");
        let stage = SyncStage::BackupRemote;
        let file = self
            .remote
            .find_by_name(&self.settings.file_name)
            .await
            .map_err(|err| stage_failed(stage, err))?;
        let folder = self
            .remote
            .find_by_name(&self.settings.remote_backup_folder)
            .await
            .map_err(|err| stage_failed(stage, err))?;
        let name = format!(
            "{}-{}",
            Local::now().format(REMOTE_BACKUP_TIME_FORMAT),
            self.settings.file_name
        );
        let copy = self
            .remote
            .copy_as(&file, &name, &folder)
            .await
            .map_err(|err| stage_failed(stage, err))?;
        info!(name = %copy.name, folder = %folder.name, "remote backup created");
        Ok(copy)
    }

    pub async fn download_remote(&self) -> Result<(), SyncError> {
        info!(stage = %SyncStage::DownloadRemote, "downloading remote database");
        let stage = SyncStage::DownloadRemote;
        let file = self
            .remote
            .find_by_name(&self.settings.file_name)
            .await
            .map_err(|err| stage_failed(stage, err))?;
        let target = self.settings.remote_copy_path();
        self.remote
            .download_to(&file, &target)
            .await
            .map_err(|err| stage_failed(stage, err))?;
        info!(path = %target.display(), "remote database downloaded");
        Ok(())
    }

    /// Seeds the sync output from the local file and writes the merge into it.
    pub fn merge(&self) -> Result<MergeStats, SyncError> {
        info!(stage = %SyncStage::Merge, "merging databases");
        self.merge_into_sync_output()
            .map_err(|err| stage_failed(SyncStage::Merge, err))
    }

    fn merge_into_sync_output(&self) -> Result<MergeStats, StageError> {
        let original = self.settings.full_file_path();
        let remote_copy = self.settings.remote_copy_path();
        let sync_path = self.settings.sync_file_path();

        let local_bytes = read(&original)?;
        write_synced(&sync_path, &local_bytes)
            .map_err(|err| StageError::io("write", &sync_path, err))?;
        let remote_bytes = read(&remote_copy)?;
        let scratch_bytes = read(&sync_path)?;

        let mut databases = DatabaseSync::open(
            self.codec,
            &self.settings.passphrase,
            &local_bytes,
            &remote_bytes,
            &scratch_bytes,
        )?;
        let stats = databases.merge();
        databases.save(self.codec, &sync_path)?;
        Ok(stats)
    }

    /// Confirms that the newest backup still equals the current local file.
    pub fn verify_backup(&self) -> Result<VerifiedBackup, SyncError> {
        info!(stage = %SyncStage::VerifyBackup, "verifying latest backup");
        let verified = check_latest_backup(
            &self.settings.backup_directory,
            &self.settings.full_file_path(),
        )
        .map_err(|err| stage_failed(SyncStage::VerifyBackup, err))?;
        info!(
            backup = %verified.snapshot.path.display(),
            "latest backup matches local database"
        );
        Ok(verified)
    }

    /// Replaces the local file with the sync output.
    ///
    /// Order: remove the downloaded copy, remove the original, rename the sync
    /// output into place. Each step runs only after the previous one succeeded.
    pub fn promote(&self, verified: VerifiedBackup) -> Result<(), SyncError> {
        info!(stage = %SyncStage::Promote, "promoting sync output");
        self.promote_sync_output(verified)
            .map_err(|err| stage_failed(SyncStage::Promote, err))
    }

    fn promote_sync_output(&self, verified: VerifiedBackup) -> Result<(), StageError> {
        let original = self.settings.full_file_path();
        if verified.original != original {
            return Err(StageError::BackupMismatch {
                original,
                backup: verified.snapshot.path,
            });
        }
        let remote_copy = self.settings.remote_copy_path();
        let sync_path = self.settings.sync_file_path();

        fs::remove_file(&remote_copy).map_err(|source| StageError::Promote {
            step: PromoteStep::RemoveRemoteCopy,
            path: remote_copy.clone(),
            source,
        })?;
        fs::remove_file(&original).map_err(|source| StageError::Promote {
            step: PromoteStep::RemoveOriginal,
            path: original.clone(),
            source,
        })?;
        fs::rename(&sync_path, &original).map_err(|source| StageError::PromoteIncomplete {
            original: original.clone(),
            sync_output: sync_path.clone(),
            backup: verified.snapshot.path.clone(),
            source,
        })?;
        // The rename already happened; a failed flush only weakens durability.
        if let Err(err) = sync_directory(&self.settings.directory) {
            warn!(
                event = "directory_flush_failed",
                directory = %self.settings.directory.display(),
                error = %err,
                "can't flush directory after promotion"
            );
        }
        info!(path = %original.display(), "local database replaced");
        Ok(())
    }

    pub async fn upload_remote(&self) -> Result<(), SyncError> {
        info!(stage = %SyncStage::UploadRemote, "uploading merged database");
        let stage = SyncStage::UploadRemote;
        let file = self
            .remote
            .find_by_name(&self.settings.file_name)
            .await
            .map_err(|err| stage_failed(stage, err))?;
        self.remote
            .upload_replacing(&file, &self.settings.full_file_path())
            .await
            .map_err(|err| stage_failed(stage, err))?;
        info!(name = %file.name, "remote database replaced");
        Ok(())
    }
}

/// Compares the newest snapshot in `backup_directory` with `original`.
///
/// A mismatch is reported as [`StageError::BackupMismatch`].
pub fn check_latest_backup(
    backup_directory: &Path,
    original: &Path,
) -> Result<VerifiedBackup, StageError> {
    let snapshot = latest_backup(backup_directory)?;
    if !equal_content(&snapshot.path, original)? {
        return Err(StageError::BackupMismatch {
            original: original.to_path_buf(),
            backup: snapshot.path,
        });
    }
    Ok(VerifiedBackup {
        snapshot,
        original: original.to_path_buf(),
    })
}

fn read(path: &Path) -> Result<Vec<u8>, StageError> {
    fs::read(path).map_err(|err| StageError::io("read", path, err))
}
