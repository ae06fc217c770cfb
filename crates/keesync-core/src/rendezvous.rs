//! One-shot local HTTP listener that hands a single browser-supplied value
//! (an OAuth authorization code or a typed passphrase) to the waiting task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RendezvousError {
    #[error("can't bind callback listener on {addr}: {message}")]
    Bind { addr: SocketAddr, message: String },
    #[error("callback listener failed: {message}")]
    Serve { message: String },
    #[error("callback request is missing the `{0}` parameter")]
    MissingParameter(&'static str),
    #[error("callback listener stopped before delivering a value")]
    ListenerClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// OAuth redirect: `GET /?code=..`.
    AuthorizationCode,
    /// Manual entry: form at `GET /missing_pass`, submitted to `GET /get_pass?pass=..`.
    Passphrase,
}

impl CallbackKind {
    const fn callback_path(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "/",
            Self::Passphrase => "/get_pass",
        }
    }

    const fn parameter(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "code",
            Self::Passphrase => "pass",
        }
    }

    /// Path the operator should open in a browser.
    #[must_use]
    pub const fn entry_path(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "/",
            Self::Passphrase => "/missing_pass",
        }
    }
}

const PASSPHRASE_FORM: &str = r#"<!doctype html>
<html>
  <head><title>keesync</title></head>
  <body>
    <h3>Database passphrase</h3>
    <form action="/get_pass" method="get">
      <input type="password" name="pass" autofocus>
      <button type="submit">Unlock</button>
    </form>
  </body>
</html>"#;
const RECEIVED_PAGE: &str = "<p>Received. You can close this tab and return to the terminal.</p>";
const MISSING_PAGE: &str = "<p>The request did not carry the expected value.</p>";
const GONE_PAGE: &str = "<p>This link was already used.</p>";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type Outcome = Result<String, RendezvousError>;
type Slot = Arc<Mutex<Option<oneshot::Sender<Outcome>>>>;

#[derive(Clone)]
struct ListenerState {
    slot: Slot,
    shutdown: Arc<Notify>,
    parameter: &'static str,
}

/// Sends `outcome` unless a value was already delivered.
fn deliver(slot: &Slot, outcome: Outcome) -> bool {
    let sender = match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(_) => None,
    };
    match sender {
        Some(sender) => {
            let _ = sender.send(outcome);
            true
        }
        None => false,
    }
}

/// Handle to a running one-shot listener.
///
/// Exactly one `Result` is ever delivered: the first callback's value, a
/// missing-parameter error, or the listener's own bind/serve failure.
/// Dropping the handle stops the listener.
pub struct Rendezvous {
    kind: CallbackKind,
    ready: Option<oneshot::Receiver<SocketAddr>>,
    bound: Option<SocketAddr>,
    outcome: Option<oneshot::Receiver<Outcome>>,
    early: Option<Outcome>,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl Rendezvous {
    /// Spawns the listener on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn start(addr: SocketAddr, kind: CallbackKind) -> Self {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let slot: Slot = Arc::new(Mutex::new(Some(outcome_tx)));
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(serve(addr, kind, slot, Arc::clone(&shutdown), ready_tx));
        Self {
            kind,
            ready: Some(ready_rx),
            bound: None,
            outcome: Some(outcome_rx),
            early: None,
            shutdown,
            task: Some(task),
        }
    }

    /// Socket the listener is bound to, once binding succeeded.
    pub async fn bound_addr(&mut self) -> Result<SocketAddr, RendezvousError> {
        if let Some(addr) = self.bound {
            return Ok(addr);
        }
        if let Some(Err(err)) = &self.early {
            return Err(err.clone());
        }
        let Some(ready) = self.ready.take() else {
            return Err(RendezvousError::ListenerClosed);
        };
        if let Ok(addr) = ready.await {
            self.bound = Some(addr);
            return Ok(addr);
        }
        // The task never reported an address, so its outcome explains why.
        let outcome = self.receive().await;
        let err = match &outcome {
            Err(err) => err.clone(),
            Ok(_) => RendezvousError::ListenerClosed,
        };
        self.early = Some(outcome);
        Err(err)
    }

    /// URL the operator should open, available once the listener is bound.
    pub async fn entry_url(&mut self) -> Result<String, RendezvousError> {
        let addr = self.bound_addr().await?;
        Ok(format!("http://{addr}{}", self.kind.entry_path()))
    }

    /// Suspends until the single value (or error) arrives, then gives the
    /// listener a moment to release its port.
    pub async fn wait(mut self) -> Result<String, RendezvousError> {
        let outcome = match self.early.take() {
            Some(outcome) => outcome,
            None => self.receive().await,
        };
        self.shutdown.notify_one();
        if let Some(task) = self.task.take() {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
        }
        outcome
    }

    async fn receive(&mut self) -> Outcome {
        match self.outcome.take() {
            Some(outcome) => outcome.await.unwrap_or(Err(RendezvousError::ListenerClosed)),
            None => Err(RendezvousError::ListenerClosed),
        }
    }
}

impl Drop for Rendezvous {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

async fn serve(
    addr: SocketAddr,
    kind: CallbackKind,
    slot: Slot,
    shutdown: Arc<Notify>,
    ready: oneshot::Sender<SocketAddr>,
) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(event = "callback_bind_failed", %addr, error = %err);
            deliver(
                &slot,
                Err(RendezvousError::Bind {
                    addr,
                    message: err.to_string(),
                }),
            );
            return;
        }
    };
    let bound = match listener.local_addr() {
        Ok(bound) => bound,
        Err(err) => {
            deliver(
                &slot,
                Err(RendezvousError::Serve {
                    message: err.to_string(),
                }),
            );
            return;
        }
    };
    let _ = ready.send(bound);
    tracing::info!(event = "callback_listening", addr = %bound);

    let state = ListenerState {
        slot: Arc::clone(&slot),
        shutdown: Arc::clone(&shutdown),
        parameter: kind.parameter(),
    };
    let mut app = Router::new().route(kind.callback_path(), get(handle_callback));
    if kind == CallbackKind::Passphrase {
        app = app.route(kind.entry_path(), get(passphrase_form));
    }
    let app = app.with_state(state);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await;
    if let Err(err) = result {
        tracing::error!(event = "callback_serve_failed", error = %err);
        deliver(
            &slot,
            Err(RendezvousError::Serve {
                message: err.to_string(),
            }),
        );
    }
    tracing::debug!(event = "callback_stopped", addr = %bound);
}

async fn passphrase_form() -> Html<&'static str> {
    Html(PASSPHRASE_FORM)
}

async fn handle_callback(
    State(state): State<ListenerState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    let outcome = match params.get(state.parameter) {
        Some(value) if !value.is_empty() => Ok(value.clone()),
        _ => Err(RendezvousError::MissingParameter(state.parameter)),
    };
    let status = if outcome.is_ok() {
        (StatusCode::OK, Html(RECEIVED_PAGE))
    } else {
        (StatusCode::BAD_REQUEST, Html(MISSING_PAGE))
    };
    if !deliver(&state.slot, outcome) {
        return (StatusCode::GONE, Html(GONE_PAGE));
    }
    state.shutdown.notify_one();
    status
}
