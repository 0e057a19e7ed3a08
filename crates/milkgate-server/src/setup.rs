//! One-shot upstream credential capture
//!
//! `GET /setup` renders the form; `POST /setup` validates the submitted
//! pair, probes it against the upstream API with a scratch client, and
//! stores it encrypted, keyed by the caller's stable identifier. Any
//! method other than GET/POST gets the router's automatic 405.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Form;
use serde::Deserialize;
use tracing::{info, warn};

use crate::html;
use crate::state::AppState;

/// Minimum length for either credential half
const MIN_CREDENTIAL_LEN: usize = 10;

/// GET /setup
pub async fn setup_form() -> Html<String> {
    Html(html::setup_page(None))
}

#[derive(Debug, Default, Deserialize)]
pub struct SetupForm {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

/// POST /setup
pub async fn setup_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<SetupForm>,
) -> Response {
    if form.api_key.len() < MIN_CREDENTIAL_LEN || form.api_secret.len() < MIN_CREDENTIAL_LEN {
        return setup_error("API key and shared secret must each be at least 10 characters.");
    }

    // Probe before storing: a frob request with the submitted pair
    // proves the credentials sign correctly.
    if let Err(err) = state.probe.probe(&form.api_key, &form.api_secret).await {
        warn!(error = %err, "credential probe failed");
        return setup_error(&format!("Upstream rejected the credentials: {err}"));
    }

    let user_id = caller_id(&headers);
    match state
        .credentials
        .store(&user_id, &form.api_key, &form.api_secret)
        .await
    {
        Ok(()) => {
            info!(%user_id, "stored upstream credentials");
            Html(html::setup_success_page()).into_response()
        }
        Err(err) => {
            warn!(error = %err, "credential store write failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(html::error_page("Failed to store credentials.")),
            )
                .into_response()
        }
    }
}

/// Stable identifier for the submitting caller: the first forwarded
/// address when present, otherwise a fixed local identity.
fn caller_id(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

fn setup_error(reason: &str) -> Response {
    (StatusCode::BAD_REQUEST, Html(html::setup_page(Some(reason)))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_id_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.1.2.3, 172.16.0.1".parse().unwrap());
        assert_eq!(caller_id(&headers), "10.1.2.3");
    }

    #[test]
    fn test_caller_id_falls_back_to_local() {
        assert_eq!(caller_id(&HeaderMap::new()), "local");
    }
}
