//! Loopback callback listener
//!
//! An optional HTTP listener that accepts the authorization redirect on
//! a loopback port, validates the one-time CSRF state, renders a small
//! confirmation page, and signals a single waiter. Used when the party
//! driving the flow runs on the same host as the browser.

use crate::csrf::CsrfStateTable;
use crate::error::{AuthError, AuthResult};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

struct ListenerState {
    csrf: Arc<CsrfStateTable>,
    client_id: String,
    // Written to exactly once per run; the first valid redirect takes it.
    result_tx: std::sync::Mutex<Option<oneshot::Sender<AuthResult<String>>>>,
}

struct Running {
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
    local_addr: SocketAddr,
}

/// One-shot loopback listener for the authorization redirect
pub struct CallbackServer {
    port: u16,
    client_id: String,
    csrf: Arc<CsrfStateTable>,
    running: Mutex<Option<Running>>,
    result_rx: Mutex<Option<oneshot::Receiver<AuthResult<String>>>>,
}

impl CallbackServer {
    /// `port` 0 binds an ephemeral port; see [`local_addr`](Self::local_addr).
    pub fn new(port: u16, client_id: impl Into<String>, csrf: Arc<CsrfStateTable>) -> Self {
        Self {
            port,
            client_id: client_id.into(),
            csrf,
            running: Mutex::new(None),
            result_rx: Mutex::new(None),
        }
    }

    /// Bind the loopback listener and start serving. A second call while
    /// running fails with [`AuthError::CallbackAlreadyRunning`].
    pub async fn start(&self) -> AuthResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(AuthError::CallbackAlreadyRunning);
        }

        let (result_tx, result_rx) = oneshot::channel();
        let state = Arc::new(ListenerState {
            csrf: self.csrf.clone(),
            client_id: self.client_id.clone(),
            result_tx: std::sync::Mutex::new(Some(result_tx)),
        });

        let app = Router::new()
            .route("/callback", get(handle_callback))
            .route("/auth/callback", get(handle_callback))
            .route("/oauth/callback", get(handle_callback))
            .fallback(handle_callback)
            .with_state(state);

        let listener =
            tokio::net::TcpListener::bind(("127.0.0.1", self.port)).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "callback listener started");

        let shutdown = CancellationToken::new();
        let serve_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
                .await;
            if let Err(err) = result {
                warn!(error = %err, "callback listener failed");
            }
        });

        *running = Some(Running {
            shutdown,
            handle,
            local_addr,
        });
        *self.result_rx.lock().await = Some(result_rx);
        Ok(())
    }

    /// Bound address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Wait for the redirect to arrive, up to `timeout`. Returns the
    /// authorization code.
    pub async fn wait_for_callback(&self, timeout: Duration) -> AuthResult<String> {
        let rx = self
            .result_rx
            .lock()
            .await
            .take()
            .ok_or(AuthError::CallbackNotRunning)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AuthError::CallbackClosed),
            Err(_) => Err(AuthError::CallbackTimeout),
        }
    }

    /// Graceful shutdown. In-flight connections get five seconds.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.shutdown.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, running.handle)
            .await
            .is_err()
        {
            warn!("callback listener did not stop within grace period");
        }
        // Dropping any unconsumed receiver closes the signal channel.
        self.result_rx.lock().await.take();
    }
}

async fn handle_callback(
    State(state): State<Arc<ListenerState>>,
    Query(query): Query<CallbackQuery>,
) -> (StatusCode, Html<String>) {
    if let Some(error) = query.error {
        debug!(%error, "callback carried an upstream error");
        signal(&state, Err(AuthError::Denied(error.clone())));
        return (
            StatusCode::BAD_REQUEST,
            Html(page(
                "Authorization Failed",
                &format!("The authorization server reported: {error}"),
            )),
        );
    }

    let (Some(code), Some(csrf_state)) = (query.code, query.state) else {
        return (
            StatusCode::BAD_REQUEST,
            Html(page("Invalid Callback", "Missing code or state parameter.")),
        );
    };

    if !state.csrf.validate(&csrf_state, &state.client_id).await {
        // Unverifiable redirects do not consume the waiter.
        return (
            StatusCode::BAD_REQUEST,
            Html(page("Invalid Callback", "State token is unknown or expired.")),
        );
    }

    signal(&state, Ok(code));
    (
        StatusCode::OK,
        Html(page(
            "Authorization Complete",
            "You can close this window and return to the application.",
        )),
    )
}

fn signal(state: &ListenerState, result: AuthResult<String>) {
    if let Some(tx) = state.result_tx.lock().expect("result_tx mutex").take() {
        let _ = tx.send(result);
    }
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{body}</p></body></html>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_callback_roundtrip() {
        let csrf = Arc::new(CsrfStateTable::new());
        let server = CallbackServer::new(0, "client-1", csrf.clone());
        server.start().await.unwrap();
        let addr = server.local_addr().await.unwrap();

        let state = csrf.generate("client-1").await;
        let url = format!("http://{addr}/callback?code=code-xyz&state={state}");
        let response = reqwest::get(&url).await.unwrap();
        assert!(response.status().is_success());

        let code = server
            .wait_for_callback(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(code, "code-xyz");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let csrf = Arc::new(CsrfStateTable::new());
        let server = CallbackServer::new(0, "client-1", csrf);
        server.start().await.unwrap();
        assert!(matches!(
            server.start().await,
            Err(AuthError::CallbackAlreadyRunning)
        ));
        server.stop().await;

        // A stopped server can start again.
        server.start().await.unwrap();
        server.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_state_does_not_consume_waiter() {
        let csrf = Arc::new(CsrfStateTable::new());
        let server = CallbackServer::new(0, "client-1", csrf.clone());
        server.start().await.unwrap();
        let addr = server.local_addr().await.unwrap();

        let bogus = format!("http://{addr}/callback?code=evil&state=bogus");
        let response = reqwest::get(&bogus).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        // The real redirect still gets through, on an alternate path.
        let state = csrf.generate("client-1").await;
        let url = format!("http://{addr}/oauth/callback?code=real&state={state}");
        reqwest::get(&url).await.unwrap();

        let code = server
            .wait_for_callback(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(code, "real");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_wait_timeout() {
        let csrf = Arc::new(CsrfStateTable::new());
        let server = CallbackServer::new(0, "client-1", csrf);
        server.start().await.unwrap();
        assert!(matches!(
            server.wait_for_callback(Duration::from_millis(50)).await,
            Err(AuthError::CallbackTimeout)
        ));
        server.stop().await;
    }
}
