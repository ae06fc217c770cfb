use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use keesync_core::{DatabaseSettings, Passphrase};
use keesync_keystore::{SecretId, SecretStore};
use serde::{Deserialize, Serialize};

/// Contents of `config.json`. Every field is optional; flags and environment
/// variables take precedence.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct FileConfig {
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub remote_copy_prefix: Option<String>,
    #[serde(default)]
    pub sync_db_name: Option<String>,
    #[serde(default)]
    pub backup_directory: Option<PathBuf>,
    #[serde(default)]
    pub remote_backup_folder: Option<String>,
    #[serde(default)]
    pub callback_port: Option<u16>,
    #[serde(default)]
    pub secret_id: Option<SecretIdConfig>,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct SecretIdConfig {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RemoteConfig {
    GoogleDrive {
        credentials_path: PathBuf,
        token_path: PathBuf,
    },
    LocalMirror {
        root: PathBuf,
    },
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub directory: PathBuf,
    pub file_name: String,
    pub remote_copy_prefix: String,
    pub sync_db_name: String,
    pub backup_directory: PathBuf,
    pub remote_backup_folder: String,
    pub callback_port: u16,
    pub secret_id: SecretId,
    pub remote: RemoteConfig,
}

impl RunConfig {
    pub fn database_settings(&self, passphrase: Passphrase) -> DatabaseSettings {
        let mut settings = DatabaseSettings::new(&self.directory, &self.file_name, passphrase);
        settings.remote_copy_prefix = self.remote_copy_prefix.clone();
        settings.sync_db_name = self.sync_db_name.clone();
        settings.backup_directory = self.backup_directory.clone();
        settings.remote_backup_folder = self.remote_backup_folder.clone();
        settings
    }

    pub fn callback_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.callback_port))
    }

    pub fn database_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

pub struct CommandContext<'a> {
    pub config: &'a RunConfig,
    pub store: &'a dyn SecretStore,
    pub client: &'a reqwest::Client,
}
