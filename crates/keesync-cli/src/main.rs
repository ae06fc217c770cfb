use std::process::ExitCode;

use clap::Parser;
use keesync_core::SyncError;
use tracing_subscriber::EnvFilter;

mod cli_args;
mod cli_command;
mod modules;

use crate::cli_args::*;
use crate::cli_command::handle_command;
use crate::modules::auth::secret_store;
use crate::modules::system::{load_config, resolve_config, CommandContext};

pub(crate) const DEFAULT_CALLBACK_PORT: u16 = 3030;
pub(crate) const SECRET_SERVICE: &str = "keesync";
pub(crate) const REFRESH_SKEW_SECONDS: i64 = 30;
pub(crate) const PASSPHRASE_ENV: &str = "KEESYNC_PASSPHRASE";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(cli.verbose) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let sync_err = err.downcast_ref::<SyncError>();
            if sync_err.is_some_and(SyncError::needs_upload_retry) {
                eprintln!(
                    "The local database is already merged; run `keesync sync` again \
                     or upload it manually to refresh the remote copy."
                );
            }
            if sync_err.is_some_and(SyncError::local_missing) {
                eprintln!(
                    "The local database file is missing. Move the merged database or \
                     the verified snapshot named above into its place before running \
                     `keesync sync` again."
                );
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let file_config = load_config(cli.config.as_deref())?;
    let config = resolve_config(&cli.database, &cli.remote, file_config)?;
    let store = secret_store(cli.no_keychain);
    let client = reqwest::Client::builder().build()?;
    let ctx = CommandContext {
        config: &config,
        store: store.as_ref(),
        client: &client,
    };
    handle_command(cli.command, &ctx).await
}

fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter)?)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
