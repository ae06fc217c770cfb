mod error;
mod round;

pub use error::{ErrorClass, PromoteStep, StageError, SyncError, SyncStage};
pub use round::{check_latest_backup, BackupReport, SyncReport, SyncRound, VerifiedBackup};

/// Remote snapshot names keep the colons the drive accepts.
pub const REMOTE_BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
