use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use keesync_core::{CallbackKind, Rendezvous};
use tracing::{debug, info};

use super::types::{ClientSecrets, CredentialsFile, StoredToken, TokenErrorResponse, TokenResponse};
use crate::REFRESH_SKEW_SECONDS;

pub(crate) const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

pub(crate) fn load_client_secrets(path: &Path) -> anyhow::Result<ClientSecrets> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("can't read OAuth client file {}", path.display()))?;
    let file: CredentialsFile = serde_json::from_str(&contents)
        .with_context(|| format!("can't parse OAuth client file {}", path.display()))?;
    file.installed
        .or(file.web)
        .ok_or_else(|| anyhow::anyhow!("OAuth client file has neither `installed` nor `web` client"))
}

pub(crate) fn load_token(path: &Path) -> anyhow::Result<Option<StoredToken>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("can't read token file {}", path.display()))?;
    let token = serde_json::from_str(&contents)
        .with_context(|| format!("can't parse token file {}", path.display()))?;
    Ok(Some(token))
}

/// Writes the token readable by the owner only.
pub(crate) fn save_token(path: &Path, token: &StoredToken) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(token)?;
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("can't write token file {}", path.display()))?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

pub(crate) fn is_fresh(token: &StoredToken) -> bool {
    match token.expiry {
        Some(expiry) => expiry > Utc::now() + ChronoDuration::seconds(REFRESH_SKEW_SECONDS),
        None => true,
    }
}

pub(crate) fn authorization_url(secrets: &ClientSecrets, redirect_uri: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
        secrets.auth_uri,
        urlencoding::encode(&secrets.client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(DRIVE_SCOPE),
    )
}

fn stored_from_response(response: TokenResponse, previous_refresh: Option<String>) -> StoredToken {
    StoredToken {
        access_token: response.access_token,
        refresh_token: response.refresh_token.or(previous_refresh),
        token_type: response.token_type,
        expiry: response
            .expires_in
            .map(|seconds| Utc::now() + ChronoDuration::seconds(seconds)),
    }
}

async fn request_token(
    client: &reqwest::Client,
    secrets: &ClientSecrets,
    params: &[(&str, &str)],
) -> anyhow::Result<TokenResponse> {
    let response = client.post(&secrets.token_uri).form(params).send().await?;
    if response.status().is_success() {
        return Ok(response.json::<TokenResponse>().await?);
    }
    let status = response.status();
    let error = response
        .json::<TokenErrorResponse>()
        .await
        .unwrap_or(TokenErrorResponse {
            error: "unknown".to_string(),
            error_description: None,
        });
    let detail = error.error_description.unwrap_or_default();
    anyhow::bail!("token request failed: {status} {} {}", error.error, detail)
}

pub(crate) async fn exchange_code(
    client: &reqwest::Client,
    secrets: &ClientSecrets,
    code: &str,
    redirect_uri: &str,
) -> anyhow::Result<StoredToken> {
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
        ("redirect_uri", redirect_uri),
    ];
    let response = request_token(client, secrets, &params).await?;
    Ok(stored_from_response(response, None))
}

pub(crate) async fn refresh_token(
    client: &reqwest::Client,
    secrets: &ClientSecrets,
    refresh: &str,
) -> anyhow::Result<StoredToken> {
    let params = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
    ];
    let response = request_token(client, secrets, &params).await?;
    Ok(stored_from_response(response, Some(refresh.to_string())))
}

/// Cached token if still valid, refreshed token if it can be refreshed,
/// otherwise a new one obtained through the browser consent flow.
pub(crate) async fn ensure_access_token(
    client: &reqwest::Client,
    credentials_path: &Path,
    token_path: &Path,
    callback_addr: SocketAddr,
) -> anyhow::Result<String> {
    let secrets = load_client_secrets(credentials_path)?;
    if let Some(token) = load_token(token_path)? {
        if is_fresh(&token) {
            debug!("using cached drive token");
            return Ok(token.access_token);
        }
        if let Some(refresh) = token.refresh_token.as_deref() {
            info!("refreshing expired drive token");
            let token = refresh_token(client, &secrets, refresh).await?;
            save_token(token_path, &token)?;
            return Ok(token.access_token);
        }
    }

    let mut rendezvous = Rendezvous::start(callback_addr, CallbackKind::AuthorizationCode);
    let redirect_uri = rendezvous.entry_url().await?;
    println!(
        "Go to the following link in your browser to authorize access:\n{}",
        authorization_url(&secrets, &redirect_uri)
    );
    let code = rendezvous
        .wait()
        .await
        .context("can't obtain the authorization code")?;
    let token = exchange_code(client, &secrets, &code, &redirect_uri).await?;
    save_token(token_path, &token)?;
    info!(path = %token_path.display(), "drive token cached");
    Ok(token.access_token)
}
