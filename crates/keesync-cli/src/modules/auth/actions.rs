use keesync_core::{resolve_passphrase, Passphrase};
use keesync_keystore::{KeyringSecretStore, MemorySecretStore, SecretStore};
use tracing::debug;

use crate::modules::system::CommandContext;
use crate::PASSPHRASE_ENV;

pub(crate) fn secret_store(no_keychain: bool) -> Box<dyn SecretStore> {
    if no_keychain {
        Box::new(MemorySecretStore::new())
    } else {
        Box::new(KeyringSecretStore::new())
    }
}

/// `KEESYNC_PASSPHRASE`, then the secret store, then the browser prompt.
pub(crate) async fn obtain_passphrase(ctx: &CommandContext<'_>) -> anyhow::Result<Passphrase> {
    if let Ok(value) = std::env::var(PASSPHRASE_ENV) {
        if !value.is_empty() {
            debug!("using passphrase from environment");
            return Ok(Passphrase::new(value));
        }
    }
    let passphrase = resolve_passphrase(
        ctx.store,
        &ctx.config.secret_id,
        ctx.config.callback_addr(),
        |url| println!("Open {url} in your browser to enter the database passphrase."),
    )
    .await?;
    Ok(passphrase)
}

pub(crate) fn handle_forget_passphrase(ctx: &CommandContext<'_>) -> anyhow::Result<()> {
    ctx.store.delete_secret(&ctx.config.secret_id)?;
    println!("Forgot the cached passphrase for {}.", ctx.config.secret_id);
    Ok(())
}
