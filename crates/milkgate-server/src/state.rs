//! Shared application state

use async_trait::async_trait;
use milkgate_auth::{AuthSessionTable, CsrfStateTable};
use milkgate_core::ServerConfig;
use milkgate_rtm::{RtmClient, RtmResult, UpstreamAuthority};
use milkgate_store::{BearerStore, CredentialStore};
use std::sync::Arc;

use crate::tasks::TaskManager;

/// Probes a submitted credential pair against the upstream API.
///
/// `/setup` builds a scratch client from the submitted values and asks
/// for a frob; a factory seam keeps that testable without network access.
#[async_trait]
pub trait ProbeFactory: Send + Sync {
    /// Returns the frob the scratch client obtained.
    async fn probe(&self, api_key: &str, api_secret: &str) -> RtmResult<String>;
}

/// Production probe: a throwaway [`RtmClient`] per attempt
pub struct RtmProbeFactory;

#[async_trait]
impl ProbeFactory for RtmProbeFactory {
    async fn probe(&self, api_key: &str, api_secret: &str) -> RtmResult<String> {
        RtmClient::new(api_key, api_secret).request_frob().await
    }
}

/// Everything the handlers share. Cheap to clone; all fields are Arcs.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub sessions: Arc<AuthSessionTable>,
    pub csrf: Arc<CsrfStateTable>,
    pub bearers: Arc<dyn BearerStore>,
    pub credentials: Arc<CredentialStore>,
    pub upstream: Arc<dyn UpstreamAuthority>,
    pub probe: Arc<dyn ProbeFactory>,
    pub tasks: Arc<TaskManager>,
    /// `expires_in` advertised by the token endpoint: 3600 for the
    /// in-memory bearer store, 0 (non-expiring) for the persistent one.
    pub bearer_ttl_secs: u64,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ServerConfig,
        sessions: Arc<AuthSessionTable>,
        csrf: Arc<CsrfStateTable>,
        bearers: Arc<dyn BearerStore>,
        credentials: Arc<CredentialStore>,
        upstream: Arc<dyn UpstreamAuthority>,
        probe: Arc<dyn ProbeFactory>,
        tasks: Arc<TaskManager>,
        bearer_ttl_secs: u64,
    ) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
            csrf,
            bearers,
            credentials,
            upstream,
            probe,
            tasks,
            bearer_ttl_secs,
        }
    }
}
