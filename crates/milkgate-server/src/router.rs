//! Router assembly

use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{facade, mcp, middleware as auth_middleware, setup};

/// Build the full facade router. The bearer middleware wraps every
/// route; its bypass set keeps the OAuth surface public.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-protected-resource",
            get(facade::protected_resource_metadata),
        )
        .route(
            "/.well-known/oauth-authorization-server",
            get(facade::authorization_server_metadata),
        )
        .route("/oauth/register", post(facade::register))
        .route(
            "/oauth/authorize",
            get(facade::authorize_form).post(facade::authorize_submit),
        )
        .route("/oauth/check-auth", get(facade::check_auth))
        .route("/oauth/callback", get(facade::callback))
        .route("/oauth/token", post(facade::token))
        .route("/setup", get(setup::setup_form).post(setup::setup_submit))
        .route("/health", get(facade::health))
        .route("/mcp", post(mcp::handle_mcp))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::require_bearer,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
