use chrono::{DateTime, Utc};
use keesync_core::RemoteFile;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<RemoteFile>,
}

#[derive(Serialize)]
pub struct CopyRequest<'a> {
    pub name: &'a str,
    pub parents: Vec<&'a str>,
}

/// Downloaded OAuth client file; Google nests the secrets under `installed`
/// or `web` depending on the client type.
#[derive(Deserialize)]
pub struct CredentialsFile {
    #[serde(default)]
    pub installed: Option<ClientSecrets>,
    #[serde(default)]
    pub web: Option<ClientSecrets>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}
