use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Local};
use keesync_core::fsutil::write_synced;
use keesync_core::{
    check_latest_backup, latest_backup, AutoCodec, Database, DatabaseCodec, KdbxCodec, KdfParams,
    LocalMirrorStorage, Passphrase, RemoteStorage, StageError, SyncReport, SyncRound, VaultCodec,
};
use tracing::info;

use super::args::{DatabaseFormat, InitArgs};
use crate::modules::auth::obtain_passphrase;
use crate::modules::drive::{ensure_access_token, DriveStorage};
use crate::modules::system::{CommandContext, RemoteConfig};

pub(crate) async fn open_remote(ctx: &CommandContext<'_>) -> anyhow::Result<Box<dyn RemoteStorage>> {
    match &ctx.config.remote {
        RemoteConfig::LocalMirror { root } => {
            info!(root = %root.display(), "using local mirror as remote");
            Ok(Box::new(LocalMirrorStorage::new(root)))
        }
        RemoteConfig::GoogleDrive {
            credentials_path,
            token_path,
        } => {
            let token = ensure_access_token(
                ctx.client,
                credentials_path,
                token_path,
                ctx.config.callback_addr(),
            )
            .await?;
            Ok(Box::new(DriveStorage::new(ctx.client.clone(), token)))
        }
    }
}

pub(crate) async fn handle_sync(ctx: &CommandContext<'_>) -> anyhow::Result<()> {
    let remote = open_remote(ctx).await?;
    let passphrase = obtain_passphrase(ctx).await?;
    let settings = ctx.config.database_settings(passphrase);
    let report = SyncRound::new(&settings, &AutoCodec, remote.as_ref())
        .run()
        .await?;
    print_sync_report(&report);
    Ok(())
}

pub(crate) async fn handle_backup(ctx: &CommandContext<'_>) -> anyhow::Result<()> {
    let remote = open_remote(ctx).await?;
    // Backups copy bytes and never open the database.
    let settings = ctx.config.database_settings(Passphrase::new(String::new()));
    let report = SyncRound::new(&settings, &AutoCodec, remote.as_ref())
        .backup()
        .await?;
    println!("Local backup:  {}", report.local_backup.display());
    println!(
        "Remote backup: {}/{}",
        settings.remote_backup_folder, report.remote_backup.name
    );
    Ok(())
}

pub(crate) fn handle_verify_backup(ctx: &CommandContext<'_>) -> anyhow::Result<()> {
    let original = ctx.config.database_path();
    match check_latest_backup(&ctx.config.backup_directory, &original) {
        Ok(verified) => {
            println!(
                "{} matches {}",
                verified.snapshot().path.display(),
                original.display()
            );
            Ok(())
        }
        // Every sync rewrites the file, so this is the normal state between rounds.
        Err(StageError::BackupMismatch { backup, .. }) => {
            println!(
                "No snapshot of the current {} yet; latest is {}",
                original.display(),
                backup.display()
            );
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn handle_latest_backup(ctx: &CommandContext<'_>) -> anyhow::Result<()> {
    let snapshot = latest_backup(&ctx.config.backup_directory)?;
    let modified = DateTime::<Local>::from(snapshot.modified);
    println!(
        "{}\t{}",
        snapshot.path.display(),
        modified.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

pub(crate) async fn handle_init(args: InitArgs, ctx: &CommandContext<'_>) -> anyhow::Result<()> {
    let path = ctx.config.database_path();
    if path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists; pass --force to replace it",
            path.display()
        );
    }
    let tunes_kdf = args.kdf_memory_kb.is_some() || args.kdf_iterations.is_some();
    if tunes_kdf && args.format != DatabaseFormat::Vault {
        anyhow::bail!("--kdf-memory-kb and --kdf-iterations apply to --format vault only");
    }
    let passphrase = obtain_passphrase(ctx).await?;
    let mut kdf = KdfParams::default();
    if let Some(memory_kb) = args.kdf_memory_kb {
        kdf.memory_kb = memory_kb;
    }
    if let Some(iterations) = args.kdf_iterations {
        kdf.iterations = iterations;
    }
    let name = args
        .name
        .unwrap_or_else(|| database_name(&ctx.config.file_name));
    let database = Database::new(name, passphrase, kdf);
    let codec: &dyn DatabaseCodec = match args.format {
        DatabaseFormat::Kdbx => &KdbxCodec,
        DatabaseFormat::Vault => &VaultCodec,
    };
    let bytes = codec
        .encode(&database)
        .context("can't encode the new database")?;

    fs::create_dir_all(&ctx.config.directory).with_context(|| {
        format!("can't create directory {}", ctx.config.directory.display())
    })?;
    write_synced(&path, &bytes).with_context(|| format!("can't write {}", path.display()))?;
    info!(path = %path.display(), "database created");
    println!("Created {}", path.display());
    Ok(())
}

fn database_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file_name)
        .to_string()
}

fn print_sync_report(report: &SyncReport) {
    println!("Local backup:   {}", report.local_backup.display());
    println!("Remote backup:  {}", report.remote_backup.name);
    println!("Verified:       {}", report.verified_backup.display());
    println!(
        "Entries:        {} total ({} common, {} local only, {} remote only, {} taken from remote)",
        report.merge.total(),
        report.merge.common,
        report.merge.local_only,
        report.merge.remote_only,
        report.merge.remote_wins
    );
}
