use anyhow::Context;
use milkgate_auth::{AuthSessionTable, CsrfStateTable};
use milkgate_core::ServerConfig;
use milkgate_rtm::RtmClient;
use milkgate_server::{build_router, AppState, RtmProbeFactory, TaskManager};
use milkgate_store::{
    BearerStore, CredentialStore, MemoryBearerStore, PersistentBearerStore, SecretBox,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("milkgate=info")),
        )
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    if config.is_dev_secret() {
        warn!("running with the development master secret");
    }

    let api_key = config
        .upstream_api_key
        .clone()
        .context("RTM_API_KEY must be set (single-tenant service account)")?;
    let api_secret = config
        .upstream_api_secret
        .clone()
        .context("RTM_API_SECRET must be set (single-tenant service account)")?;

    let secret_box = SecretBox::from_master_secret(&config.master_secret);
    let credentials = Arc::new(
        CredentialStore::open(&config.credential_db_path, secret_box)
            .context("failed to open credential store")?,
    );

    // A bearer database path selects the persistent store; its bearers
    // do not expire, so the token endpoint advertises expires_in = 0.
    let (bearers, bearer_ttl_secs): (Arc<dyn BearerStore>, u64) = match &config.bearer_db_path {
        Some(path) => {
            let store =
                PersistentBearerStore::open(path).context("failed to open bearer store")?;
            store.spawn_sweeper();
            (Arc::new(store), 0)
        }
        None => {
            let store = MemoryBearerStore::new();
            store.spawn_sweeper();
            (Arc::new(store), 3600)
        }
    };

    let sessions = Arc::new(AuthSessionTable::new());
    sessions.spawn_sweeper();
    let csrf = Arc::new(CsrfStateTable::new());
    let upstream = Arc::new(RtmClient::new(api_key, api_secret));

    let (tasks, mut notifications) = TaskManager::channel();
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            debug!(
                token = %notification.progress_token,
                completed = notification.completed,
                total = notification.total,
                "task progress"
            );
        }
    });

    let state = AppState::new(
        config.clone(),
        sessions,
        csrf,
        bearers,
        credentials,
        upstream,
        Arc::new(RtmProbeFactory),
        tasks.clone(),
        bearer_ttl_secs,
    );
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    info!(
        host = %config.host,
        port = config.port,
        server_url = %config.server_url,
        "milkgate listening"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server failed")?;

    // Cancel any batch work still running before exit.
    tasks.cancel_all().await;
    info!("milkgate stopped");
    Ok(())
}
