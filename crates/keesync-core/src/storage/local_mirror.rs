use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{RemoteError, RemoteFile, RemoteStorage, FOLDER_MIME_TYPE};

const FILE_MIME_TYPE: &str = "application/octet-stream";

/// A plain directory standing in for the cloud drive.
///
/// Files live at the top level or one folder deep; a file's id is its path
/// relative to the root.
#[derive(Debug, Clone)]
pub struct LocalMirrorStorage {
    root: PathBuf,
}

impl LocalMirrorStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, file: &RemoteFile) -> PathBuf {
        self.root.join(&file.id)
    }

    async fn describe(&self, id: String, name: &str, parent: Option<&str>) -> Option<RemoteFile> {
        let metadata = fs::metadata(self.root.join(&id)).await.ok()?;
        let mime_type = if metadata.is_dir() {
            FOLDER_MIME_TYPE
        } else {
            FILE_MIME_TYPE
        };
        Some(RemoteFile {
            id,
            name: name.to_owned(),
            mime_type: Some(mime_type.to_owned()),
            parents: parent.map(str::to_owned).into_iter().collect(),
        })
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}

#[async_trait]
impl RemoteStorage for LocalMirrorStorage {
    async fn find_by_name(&self, name: &str) -> Result<RemoteFile, RemoteError> {
        let not_found = || RemoteError::NotFound {
            name: name.to_owned(),
        };
        if !is_plain_name(name) {
            return Err(not_found());
        }
        if let Some(file) = self.describe(name.to_owned(), name, None).await {
            return Ok(file);
        }

        let mut listing = fs::read_dir(&self.root)
            .await
            .map_err(|err| RemoteError::io(&self.root, err))?;
        let mut folders = Vec::new();
        while let Some(item) = listing
            .next_entry()
            .await
            .map_err(|err| RemoteError::io(&self.root, err))?
        {
            let folder = item.file_name().to_string_lossy().into_owned();
            let is_dir = item.file_type().await.is_ok_and(|kind| kind.is_dir());
            if is_dir && is_plain_name(&folder) {
                folders.push(folder);
            }
        }
        folders.sort();
        for folder in folders {
            let id = format!("{folder}/{name}");
            if let Some(file) = self.describe(id, name, Some(&folder)).await {
                return Ok(file);
            }
        }
        Err(not_found())
    }

    async fn download_to(&self, file: &RemoteFile, local_path: &Path) -> Result<(), RemoteError> {
        let source = self.path_of(file);
        fs::copy(&source, local_path)
            .await
            .map_err(|err| RemoteError::io(&source, err))?;
        fs::File::open(local_path)
            .await
            .map_err(|err| RemoteError::io(local_path, err))?
            .sync_all()
            .await
            .map_err(|err| RemoteError::io(local_path, err))?;
        debug!(id = %file.id, path = %local_path.display(), "mirror file downloaded");
        Ok(())
    }

    async fn upload_replacing(
        &self,
        file: &RemoteFile,
        local_path: &Path,
    ) -> Result<(), RemoteError> {
        let target = self.path_of(file);
        if !fs::try_exists(&target).await.unwrap_or(false) {
            return Err(RemoteError::NotFound {
                name: file.name.clone(),
            });
        }
        let staging = target.with_file_name(format!(".{}.upload", file.name));
        fs::copy(local_path, &staging)
            .await
            .map_err(|err| RemoteError::io(local_path, err))?;
        fs::File::open(&staging)
            .await
            .map_err(|err| RemoteError::io(&staging, err))?
            .sync_all()
            .await
            .map_err(|err| RemoteError::io(&staging, err))?;
        fs::rename(&staging, &target)
            .await
            .map_err(|err| RemoteError::io(&target, err))?;
        debug!(id = %file.id, "mirror file replaced");
        Ok(())
    }

    async fn copy_as(
        &self,
        file: &RemoteFile,
        new_name: &str,
        parent: &RemoteFile,
    ) -> Result<RemoteFile, RemoteError> {
        if !parent.is_folder() {
            return Err(RemoteError::NotFound {
                name: parent.name.clone(),
            });
        }
        let source = self.path_of(file);
        let id = format!("{}/{new_name}", parent.id);
        let target = self.root.join(&id);
        fs::copy(&source, &target)
            .await
            .map_err(|err| RemoteError::io(&target, err))?;
        Ok(RemoteFile {
            id,
            name: new_name.to_owned(),
            mime_type: file.mime_type.clone(),
            parents: vec![parent.id.clone()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror_with_backups() -> (tempfile::TempDir, LocalMirrorStorage) {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("vault.kdbx"), b"remote bytes").expect("seed");
        std::fs::create_dir(dir.path().join("Backups")).expect("mkdir");
        let storage = LocalMirrorStorage::new(dir.path());
        (dir, storage)
    }

    #[tokio::test]
    async fn finds_top_level_files_and_folders() {
        let (_dir, storage) = mirror_with_backups();
        let file = storage.find_by_name("vault.kdbx").await.expect("file");
        assert!(!file.is_folder());
        let folder = storage.find_by_name("Backups").await.expect("folder");
        assert!(folder.is_folder());
    }

    #[tokio::test]
    async fn finds_files_one_folder_deep() {
        let (dir, storage) = mirror_with_backups();
        std::fs::write(dir.path().join("Backups").join("old.kdbx"), b"old").expect("seed");
        let file = storage.find_by_name("old.kdbx").await.expect("file");
        assert_eq!(file.id, "Backups/old.kdbx");
        assert_eq!(file.parents, vec!["Backups".to_owned()]);
    }

    #[tokio::test]
    async fn missing_name_is_not_found() {
        let (_dir, storage) = mirror_with_backups();
        let err = storage.find_by_name("nope.kdbx").await.expect_err("missing");
        assert!(matches!(err, RemoteError::NotFound { .. }));
        let err = storage.find_by_name("../etc").await.expect_err("escape");
        assert!(matches!(err, RemoteError::NotFound { .. }));
    }

    #[tokio::test]
    async fn copy_download_and_upload_move_bytes() {
        let (dir, storage) = mirror_with_backups();
        let file = storage.find_by_name("vault.kdbx").await.expect("file");
        let folder = storage.find_by_name("Backups").await.expect("folder");

        let copy = storage
            .copy_as(&file, "2024-01-01T00:00:00-vault.kdbx", &folder)
            .await
            .expect("copy");
        assert_eq!(copy.parents, vec![folder.id.clone()]);

        let local = dir.path().join("downloaded");
        storage.download_to(&file, &local).await.expect("download");
        assert_eq!(std::fs::read(&local).expect("read"), b"remote bytes");

        std::fs::write(&local, b"merged bytes").expect("edit");
        storage.upload_replacing(&file, &local).await.expect("upload");
        assert_eq!(
            std::fs::read(dir.path().join("vault.kdbx")).expect("read"),
            b"merged bytes"
        );
        assert_eq!(
            std::fs::read(dir.path().join("Backups").join("2024-01-01T00:00:00-vault.kdbx"))
                .expect("read"),
            b"remote bytes"
        );
    }

    #[tokio::test]
    async fn copy_into_a_plain_file_is_refused() {
        let (_dir, storage) = mirror_with_backups();
        let file = storage.find_by_name("vault.kdbx").await.expect("file");
        let err = storage
            .copy_as(&file, "copy", &file)
            .await
            .expect_err("not a folder");
        assert!(matches!(err, RemoteError::NotFound { .. }));
    }
}
