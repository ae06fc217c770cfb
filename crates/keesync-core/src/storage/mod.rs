mod local_mirror;

use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local_mirror::LocalMirrorStorage;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// A file or folder as the remote store identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

impl RemoteFile {
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }
}

pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote file `{name}` not found")]
    NotFound { name: String },
    #[error("remote storage answered {status} while trying to {action}: {body}")]
    Status {
        action: &'static str,
        status: u16,
        body: String,
    },
    #[error("can't {action}")]
    Transport {
        action: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("remote storage authorization failed: {message}")]
    Auth { message: String },
    #[error("unexpected response while trying to {action}")]
    InvalidResponse {
        action: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("can't access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RemoteError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The operations a sync round needs from a remote store. The round never
/// learns which backend it talks to.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// First non-trashed file or folder called `name`.
    async fn find_by_name(&self, name: &str) -> Result<RemoteFile, RemoteError>;
    /// Writes the current bytes of `file` to `local_path`, replacing it.
    async fn download_to(&self, file: &RemoteFile, local_path: &Path) -> Result<(), RemoteError>;
    /// Replaces the content of `file` with the bytes at `local_path`.
    async fn upload_replacing(
        &self,
        file: &RemoteFile,
        local_path: &Path,
    ) -> Result<(), RemoteError>;
    /// Duplicates `file` as `new_name` inside `parent`.
    async fn copy_as(
        &self,
        file: &RemoteFile,
        new_name: &str,
        parent: &RemoteFile,
    ) -> Result<RemoteFile, RemoteError>;
}
