use std::path::PathBuf;

use clap::Args;

#[derive(Args, Debug, Clone, Default)]
pub struct DatabaseArgs {
    #[arg(long, env = "KEESYNC_DB_DIRECTORY", help = "Directory holding the database")]
    pub directory: Option<PathBuf>,
    #[arg(long, env = "KEESYNC_DB_FILE_NAME", help = "Database file name, locally and remotely")]
    pub file_name: Option<String>,
    #[arg(long, env = "KEESYNC_BACKUP_DIRECTORY")]
    pub backup_directory: Option<PathBuf>,
    #[arg(long, env = "KEESYNC_REMOTE_BACKUP_FOLDER")]
    pub remote_backup_folder: Option<String>,
    #[arg(
        long,
        env = "KEESYNC_REMOTE_COPY_PREFIX",
        help = "Prefix of the downloaded remote copy"
    )]
    pub remote_copy_prefix: Option<String>,
    #[arg(long, env = "KEESYNC_SYNC_DB_NAME", help = "File name of the merge output")]
    pub sync_db_name: Option<String>,
    #[arg(long, env = "KEESYNC_CALLBACK_PORT", help = "Port of the local callback listener")]
    pub callback_port: Option<u16>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RemoteArgs {
    #[arg(
        long,
        env = "KEESYNC_REMOTE_MIRROR",
        conflicts_with = "drive_credentials",
        help = "Use a local directory as the remote"
    )]
    pub mirror: Option<PathBuf>,
    #[arg(long, env = "KEESYNC_DRIVE_CREDENTIALS", help = "Google OAuth client credentials file")]
    pub drive_credentials: Option<PathBuf>,
    #[arg(long, env = "KEESYNC_DRIVE_TOKEN", help = "Cached Google OAuth token file")]
    pub drive_token: Option<PathBuf>,
}
