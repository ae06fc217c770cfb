use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Local snapshot names avoid `:` so they stay valid on every filesystem.
pub const LOCAL_BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("can't read source database {path}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("can't create backup directory {path}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("can't write backup file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("can't list backup directory {path}")]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no backup found in {path}")]
    NoBackup { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub modified: SystemTime,
}

#[must_use]
pub fn backup_file_name(timestamp: DateTime<Local>, file_name: &str) -> String {
    format!("{}-{file_name}", timestamp.format(LOCAL_BACKUP_TIME_FORMAT))
}

/// Snapshots `source` into `backup_dir` as `<timestamp>-<file_name>`.
pub fn take_backup(
    source: &Path,
    backup_dir: &Path,
    file_name: &str,
) -> Result<PathBuf, BackupError> {
    take_backup_at(source, backup_dir, file_name, Local::now())
}

/// Same as [`take_backup`] with an explicit timestamp.
///
/// An existing snapshot is never replaced: when the name is taken a numeric
/// suffix is appended instead.
pub fn take_backup_at(
    source: &Path,
    backup_dir: &Path,
    file_name: &str,
    now: DateTime<Local>,
) -> Result<PathBuf, BackupError> {
    let read_source = |source_err| BackupError::ReadSource {
        path: source.to_path_buf(),
        source: source_err,
    };
    let metadata = fs::metadata(source).map_err(read_source)?;
    let bytes = fs::read(source).map_err(read_source)?;

    create_backup_dir(backup_dir).map_err(|source| BackupError::CreateDirectory {
        path: backup_dir.to_path_buf(),
        source,
    })?;

    let base_name = backup_file_name(now, file_name);
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            base_name.clone()
        } else {
            format!("{base_name}-{attempt}")
        };
        let path = backup_dir.join(name);
        match write_new(&path, &bytes, metadata.permissions()) {
            Ok(()) => {
                info!(path = %path.display(), bytes = bytes.len(), "local backup written");
                return Ok(path);
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "backup name taken");
                attempt += 1;
            }
            Err(source) => return Err(BackupError::Write { path, source }),
        }
    }
}

fn create_backup_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

fn write_new(path: &Path, bytes: &[u8], permissions: fs::Permissions) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.set_permissions(permissions)?;
    file.sync_all()
}

/// Most recently modified regular file in `backup_dir`, ignoring dotfiles.
///
/// Ties keep whichever entry the directory listing returned first.
pub fn latest_backup(backup_dir: &Path) -> Result<Snapshot, BackupError> {
    let listing = fs::read_dir(backup_dir).map_err(|source| BackupError::ListDirectory {
        path: backup_dir.to_path_buf(),
        source,
    })?;

    let mut latest: Option<Snapshot> = None;
    for item in listing {
        let item = item.map_err(|source| BackupError::ListDirectory {
            path: backup_dir.to_path_buf(),
            source,
        })?;
        if item.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let metadata = match item.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(path = %item.path().display(), error = %err, "skipping unreadable backup");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata
            .modified()
            .map_err(|source| BackupError::ListDirectory {
                path: item.path(),
                source,
            })?;
        if latest.as_ref().map_or(true, |best| modified > best.modified) {
            latest = Some(Snapshot {
                path: item.path(),
                modified,
            });
        }
    }

    latest.ok_or_else(|| BackupError::NoBackup {
        path: backup_dir.to_path_buf(),
    })
}
