use std::net::SocketAddr;

use keesync_crypto::Passphrase;
use keesync_keystore::{KeystoreError, SecretId, SecretStore};
use thiserror::Error;
use tracing::info;

use crate::rendezvous::{CallbackKind, Rendezvous, RendezvousError};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Keystore(#[from] KeystoreError),
    #[error("can't obtain the passphrase interactively")]
    Rendezvous(#[from] RendezvousError),
}

/// Returns the cached passphrase for `id`, or asks the operator for one
/// through the passphrase rendezvous on `listen` and caches the answer.
///
/// `announce` receives the URL to open in a browser.
pub async fn resolve_passphrase(
    store: &dyn SecretStore,
    id: &SecretId,
    listen: SocketAddr,
    announce: impl FnOnce(&str),
) -> Result<Passphrase, CredentialError> {
    if let Some(cached) = store.get_secret(id)? {
        return Ok(Passphrase::new(cached));
    }

    let mut rendezvous = Rendezvous::start(listen, CallbackKind::Passphrase);
    let url = rendezvous.entry_url().await?;
    info!(secret = %id, "no cached passphrase, waiting for manual entry");
    announce(&url);
    let value = rendezvous.wait().await?;

    store.set_secret(id, &value)?;
    Ok(Passphrase::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keesync_keystore::MemorySecretStore;

    fn any_port() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn cached_secret_skips_the_listener() {
        let id = SecretId::new("keesync", "vault.kdbx");
        let store = MemorySecretStore::with_secret(id.clone(), "cached");
        let passphrase = resolve_passphrase(&store, &id, any_port(), |_| {
            panic!("no prompt expected")
        })
        .await
        .expect("passphrase");
        assert_eq!(passphrase.expose(), "cached");
    }

    #[tokio::test]
    async fn typed_passphrase_is_cached() {
        let id = SecretId::new("keesync", "vault.kdbx");
        let store = MemorySecretStore::new();
        let (url_tx, url_rx) = tokio::sync::oneshot::channel::<String>();

        let submit = tokio::spawn(async move {
            let url = url_rx.await.expect("url");
            let base = url.trim_end_matches("/missing_pass");
            reqwest::get(format!("{base}/get_pass?pass=typed"))
                .await
                .expect("submit");
        });
        let passphrase = resolve_passphrase(&store, &id, any_port(), |url| {
            url_tx.send(url.to_owned()).expect("send url");
        })
        .await
        .expect("passphrase");
        submit.await.expect("submit task");

        assert_eq!(passphrase.expose(), "typed");
        assert_eq!(
            store.get_secret(&id).expect("get").as_deref(),
            Some("typed")
        );
    }
}
