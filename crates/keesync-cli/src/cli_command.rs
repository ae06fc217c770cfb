use crate::cli_args::*;
use crate::modules::auth::handle_forget_passphrase;
use crate::modules::sync::{
    handle_backup, handle_init, handle_latest_backup, handle_sync, handle_verify_backup,
};
use crate::modules::system::CommandContext;

pub(crate) async fn handle_command(command: Command, ctx: &CommandContext<'_>) -> anyhow::Result<()> {
    match command {
        Command::Sync => handle_sync(ctx).await?,
        Command::Backup => handle_backup(ctx).await?,
        Command::VerifyBackup => handle_verify_backup(ctx)?,
        Command::LatestBackup => handle_latest_backup(ctx)?,
        Command::Init(args) => handle_init(args, ctx).await?,
        Command::ForgetPassphrase => handle_forget_passphrase(ctx)?,
    }

    Ok(())
}
