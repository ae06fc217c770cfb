use std::path::Path;

use async_trait::async_trait;
use keesync_core::fsutil::write_synced;
use keesync_core::{RemoteError, RemoteFile, RemoteStorage};
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response};
use tracing::debug;

use super::types::{CopyRequest, FileList};

pub(crate) const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub(crate) const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FILE_FIELDS: &str = "id,name,mimeType,parents";

/// Google Drive v3 over plain REST calls.
pub(crate) struct DriveStorage {
    client: reqwest::Client,
    access_token: String,
    api_base: String,
    upload_base: String,
}

impl DriveStorage {
    pub(crate) fn new(client: reqwest::Client, access_token: String) -> Self {
        Self::with_base_urls(client, access_token, DRIVE_API_BASE, DRIVE_UPLOAD_BASE)
    }

    pub(crate) fn with_base_urls(
        client: reqwest::Client,
        access_token: String,
        api_base: &str,
        upload_base: &str,
    ) -> Self {
        Self {
            client,
            access_token,
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
        }
    }

    async fn send(
        &self,
        action: &'static str,
        builder: RequestBuilder,
    ) -> Result<Response, RemoteError> {
        let start = std::time::Instant::now();
        let response = builder
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|err| RemoteError::Transport {
                action,
                source: Box::new(err),
            })?;
        debug!(
            action,
            status = %response.status(),
            elapsed_ms = start.elapsed().as_millis(),
            "drive response"
        );
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                action,
                status,
                body,
            });
        }
        Ok(response)
    }

    async fn json<T: for<'de> serde::Deserialize<'de>>(
        action: &'static str,
        response: Response,
    ) -> Result<T, RemoteError> {
        response
            .json::<T>()
            .await
            .map_err(|err| RemoteError::InvalidResponse {
                action,
                source: Box::new(err),
            })
    }
}

/// Quotes a value for a Drive `q` expression.
pub(crate) fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl RemoteStorage for DriveStorage {
    async fn find_by_name(&self, name: &str) -> Result<RemoteFile, RemoteError> {
        let action = "search drive files";
        let query = format!("name = '{}' and trashed = false", escape_query_value(name));
        let fields = format!("files({FILE_FIELDS})");
        let builder = self
            .client
            .get(format!("{}/files", self.api_base))
            .query(&[("q", query.as_str()), ("fields", fields.as_str())]);
        let response = self.send(action, builder).await?;
        let list: FileList = Self::json(action, response).await?;
        list.files
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound {
                name: name.to_string(),
            })
    }

    async fn download_to(&self, file: &RemoteFile, local_path: &Path) -> Result<(), RemoteError> {
        let action = "download drive file";
        let builder = self
            .client
            .get(format!("{}/files/{}", self.api_base, file.id))
            .query(&[("alt", "media")]);
        let response = self.send(action, builder).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RemoteError::Transport {
                action,
                source: Box::new(err),
            })?;
        write_synced(local_path, &bytes).map_err(|err| RemoteError::io(local_path, err))?;
        debug!(id = %file.id, bytes = bytes.len(), "drive file downloaded");
        Ok(())
    }

    async fn upload_replacing(
        &self,
        file: &RemoteFile,
        local_path: &Path,
    ) -> Result<(), RemoteError> {
        let action = "upload drive file";
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|err| RemoteError::io(local_path, err))?;
        let builder = self
            .client
            .patch(format!("{}/files/{}", self.upload_base, file.id))
            .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        self.send(action, builder).await?;
        Ok(())
    }

    async fn copy_as(
        &self,
        file: &RemoteFile,
        new_name: &str,
        parent: &RemoteFile,
    ) -> Result<RemoteFile, RemoteError> {
        let action = "copy drive file";
        let builder = self
            .client
            .post(format!("{}/files/{}/copy", self.api_base, file.id))
            .query(&[("fields", FILE_FIELDS)])
            .json(&CopyRequest {
                name: new_name,
                parents: vec![parent.id.as_str()],
            });
        let response = self.send(action, builder).await?;
        Self::json(action, response).await
    }
}
