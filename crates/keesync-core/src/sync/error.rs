use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::backup::BackupError;
use crate::checksum::ChecksumError;
use crate::merge::MergeError;
use crate::storage::RemoteError;

/// The states of one sync round, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncStage {
    BackupLocal,
    BackupRemote,
    DownloadRemote,
    Merge,
    VerifyBackup,
    Promote,
    UploadRemote,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BackupLocal => "local backup",
            Self::BackupRemote => "remote backup",
            Self::DownloadRemote => "remote download",
            Self::Merge => "merge",
            Self::VerifyBackup => "backup verification",
            Self::Promote => "promotion",
            Self::UploadRemote => "remote upload",
        };
        f.write_str(name)
    }
}

/// Promotion sub-steps, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteStep {
    RemoveRemoteCopy,
    RemoveOriginal,
    RenameSyncOutput,
}

impl fmt::Display for PromoteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RemoveRemoteCopy => "remove remote copy",
            Self::RemoveOriginal => "remove original",
            Self::RenameSyncOutput => "rename sync output over",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad passphrase or unreadable database content. Fix the input and rerun.
    Input,
    /// Filesystem failure. Rerunning is safe once fixed, unless promotion began.
    Io,
    /// The pre-sync backup could not be confirmed. Needs operator review.
    Integrity,
    /// The remote store refused or failed an operation.
    Remote,
    /// The original was removed but the merged file is not in its place.
    /// Restore the local database by hand before rerunning.
    Recovery,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Checksum(#[from] ChecksumError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("can't {action} {path}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("latest backup {backup} does not match {original}")]
    BackupMismatch { original: PathBuf, backup: PathBuf },
    #[error("can't {step} {path}")]
    Promote {
        step: PromoteStep,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "removed {original} but can't move {sync_output} into its place; \
         the merged database is {sync_output}, the pre-sync snapshot is {backup}"
    )]
    PromoteIncomplete {
        original: PathBuf,
        sync_output: PathBuf,
        backup: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StageError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Merge(err) if err.is_input() => ErrorClass::Input,
            Self::Remote(_) => ErrorClass::Remote,
            Self::BackupMismatch { .. } => ErrorClass::Integrity,
            Self::PromoteIncomplete { .. } => ErrorClass::Recovery,
            Self::Backup(_)
            | Self::Checksum(_)
            | Self::Merge(_)
            | Self::Io { .. }
            | Self::Promote { .. } => ErrorClass::Io,
        }
    }
}

/// A failed round: which state failed and why.
#[derive(Debug, Error)]
#[error("{stage} failed")]
pub struct SyncError {
    pub stage: SyncStage,
    #[source]
    pub source: StageError,
}

impl SyncError {
    pub fn new(stage: SyncStage, source: impl Into<StageError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        self.source.class()
    }

    /// The local file was already promoted; only the upload is missing.
    #[must_use]
    pub fn needs_upload_retry(&self) -> bool {
        self.stage == SyncStage::UploadRemote
    }

    /// The original local file is gone and the merged output was not moved
    /// into its place.
    #[must_use]
    pub const fn local_missing(&self) -> bool {
        matches!(self.source, StageError::PromoteIncomplete { .. })
    }

    #[must_use]
    pub const fn promote_step(&self) -> Option<PromoteStep> {
        match &self.source {
            StageError::Promote { step, .. } => Some(*step),
            StageError::PromoteIncomplete { .. } => Some(PromoteStep::RenameSyncOutput),
            _ => None,
        }
    }
}
