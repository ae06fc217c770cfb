use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use keesync_core::settings::{
    DEFAULT_BACKUP_DIR_NAME, DEFAULT_REMOTE_BACKUP_FOLDER, DEFAULT_REMOTE_COPY_PREFIX,
    DEFAULT_SYNC_DB_NAME,
};
use keesync_keystore::SecretId;

use super::types::{FileConfig, RemoteConfig, RunConfig};
use crate::cli_args::{DatabaseArgs, RemoteArgs};
use crate::{DEFAULT_CALLBACK_PORT, SECRET_SERVICE};

const CONFIG_DIR: &str = ".keesync";
const CREDENTIALS_FILE: &str = "client_credentials.json";
const TOKEN_FILE: &str = "token.json";

fn keesync_home() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(Path::new(&home).join(CONFIG_DIR))
}

fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(keesync_home()?.join("config.json"))
}

/// Reads the JSON config. A missing default file means an empty config; a
/// missing explicitly named file is an error.
pub(crate) fn load_config(explicit: Option<&Path>) -> anyhow::Result<FileConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = default_config_path()?;
            if !path.exists() {
                return Ok(FileConfig::default());
            }
            path
        }
    };
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("can't read config file {}", path.display()))?;
    let config = serde_json::from_str(&contents)
        .with_context(|| format!("can't parse config file {}", path.display()))?;
    Ok(config)
}

pub(crate) fn resolve_config(
    database: &DatabaseArgs,
    remote: &RemoteArgs,
    file: FileConfig,
) -> anyhow::Result<RunConfig> {
    let directory = database
        .directory
        .clone()
        .or(file.directory)
        .ok_or_else(|| anyhow::anyhow!("can't find directory variable"))?;
    let file_name = database
        .file_name
        .clone()
        .or(file.file_name)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("can't find db file name variable"))?;
    let backup_directory = database
        .backup_directory
        .clone()
        .or(file.backup_directory)
        .unwrap_or_else(|| directory.join(DEFAULT_BACKUP_DIR_NAME));
    let secret_id = file.secret_id.unwrap_or_default();
    let secret_id = SecretId::new(
        secret_id.service.unwrap_or_else(|| SECRET_SERVICE.to_string()),
        secret_id.account.unwrap_or_else(|| file_name.clone()),
    );
    let remote = resolve_remote(remote, file.remote)?;

    Ok(RunConfig {
        remote_copy_prefix: database
            .remote_copy_prefix
            .clone()
            .or(file.remote_copy_prefix)
            .unwrap_or_else(|| DEFAULT_REMOTE_COPY_PREFIX.to_string()),
        sync_db_name: database
            .sync_db_name
            .clone()
            .or(file.sync_db_name)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYNC_DB_NAME.to_string()),
        remote_backup_folder: database
            .remote_backup_folder
            .clone()
            .or(file.remote_backup_folder)
            .unwrap_or_else(|| DEFAULT_REMOTE_BACKUP_FOLDER.to_string()),
        callback_port: database
            .callback_port
            .or(file.callback_port)
            .unwrap_or(DEFAULT_CALLBACK_PORT),
        directory,
        file_name,
        backup_directory,
        secret_id,
        remote,
    })
}

fn resolve_remote(args: &RemoteArgs, file: Option<RemoteConfig>) -> anyhow::Result<RemoteConfig> {
    if let Some(root) = &args.mirror {
        return Ok(RemoteConfig::LocalMirror { root: root.clone() });
    }
    if args.drive_credentials.is_none() && args.drive_token.is_none() {
        if let Some(remote) = file {
            return Ok(remote);
        }
    }
    let (file_credentials, file_token) = match file {
        Some(RemoteConfig::GoogleDrive {
            credentials_path,
            token_path,
        }) => (Some(credentials_path), Some(token_path)),
        _ => (None, None),
    };
    let credentials_path = match args.drive_credentials.clone().or(file_credentials) {
        Some(path) => path,
        None => keesync_home()?.join(CREDENTIALS_FILE),
    };
    let token_path = match args.drive_token.clone().or(file_token) {
        Some(path) => path,
        None => keesync_home()?.join(TOKEN_FILE),
    };
    Ok(RemoteConfig::GoogleDrive {
        credentials_path,
        token_path,
    })
}
