use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

pub use crate::modules::sync::args::*;
pub use crate::modules::system::args::*;

#[derive(Parser)]
#[command(name = "keesync")]
#[command(about = "Keep a local password database in sync with its cloud copy")]
pub struct Cli {
    #[arg(long, env = "KEESYNC_CONFIG", help = "JSON config file (default ~/.keesync/config.json)")]
    pub config: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
    #[arg(long, help = "Do not cache the passphrase in the OS keychain")]
    pub no_keychain: bool,
    #[command(flatten)]
    pub database: DatabaseArgs,
    #[command(flatten)]
    pub remote: RemoteArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(about = "Back up, merge with the remote copy, promote and upload")]
    Sync,
    #[command(about = "Back up the local and the remote database without merging")]
    Backup,
    #[command(about = "Check that the latest local backup matches the database")]
    VerifyBackup,
    #[command(about = "Print the path of the latest local backup")]
    LatestBackup,
    #[command(about = "Create an empty encrypted database")]
    Init(InitArgs),
    #[command(about = "Remove the cached passphrase from the keychain")]
    ForgetPassphrase,
}
