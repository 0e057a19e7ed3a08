//! The OAuth facade: discovery, authorization, polling, and the token
//! endpoint
//!
//! External clients run a standard authorization-code flow with CSRF and
//! PKCE; internally each `/oauth/authorize` POST opens an upstream frob
//! handshake. The session table maps the fake OAuth code to that frob
//! until `/oauth/token` consumes it.
//!
//! Locking discipline: the frob is copied out of the session table
//! before any upstream call; the table is written again only after the
//! call returns, and `finish_exchange` tolerates a session that was
//! consumed or swept in the meantime.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::Form;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use tracing::{debug, info, warn};

use milkgate_auth::types::{
    AuthorizationServerMetadata, CheckAuthResponse, ClientRegistrationRequest,
    ClientRegistrationResponse, ProtectedResourceMetadata, TokenErrorResponse, TokenResponse,
};
use milkgate_auth::{pkce, AuthSession, ExchangeTicket};
use milkgate_core::util::{generate_bearer, generate_code, generate_session_id};
use milkgate_core::FacadeError;
use milkgate_rtm::RtmError;

use crate::html;
use crate::state::AppState;

const CSRF_COOKIE: &str = "csrf_token";
/// Permission level requested from the upstream grant page
const UPSTREAM_PERMS: &str = "delete";

/// GET /.well-known/oauth-protected-resource
pub async fn protected_resource_metadata(State(state): State<AppState>) -> Response {
    Json(ProtectedResourceMetadata {
        resource: state.config.resource_url(),
        authorization_servers: vec![state.config.server_url.clone()],
    })
    .into_response()
}

/// GET /.well-known/oauth-authorization-server
pub async fn authorization_server_metadata(State(state): State<AppState>) -> Response {
    Json(AuthorizationServerMetadata::for_server(&state.config.server_url)).into_response()
}

/// POST /oauth/register — dynamic client registration (RFC 7591)
///
/// Any JSON body is accepted; clients are not authenticated by secret at
/// the token endpoint, so nothing needs to persist beyond a stable id.
pub async fn register(Json(request): Json<ClientRegistrationRequest>) -> Response {
    let client_id = generate_session_id();
    info!(%client_id, client_name = ?request.client_name, "registered client");
    Json(ClientRegistrationResponse {
        client_id,
        client_name: request.client_name,
        redirect_uris: request.redirect_uris,
        client_id_issued_at: chrono::Utc::now().timestamp() as u64,
        client_secret_expires_at: 0,
    })
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeQuery {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
}

/// GET /oauth/authorize — render the confirmation form and set the CSRF
/// cookie
pub async fn authorize_form(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let client_id = query.client_id.clone().unwrap_or_default();
    let csrf_state = state.csrf.generate(&client_id).await;

    let mut cookie = Cookie::build((CSRF_COOKIE, csrf_state.clone()))
        .http_only(true)
        .path("/")
        .max_age(cookie::time::Duration::seconds(600));
    // Cross-site POSTs from OAuth redirect chains need SameSite=None,
    // which browsers only honor over HTTPS.
    cookie = if state.config.server_url.starts_with("https://") {
        cookie.same_site(SameSite::None).secure(true)
    } else {
        cookie.same_site(SameSite::Lax)
    };

    let page = html::authorize_page(&html::AuthorizeFormParams {
        client_id: &client_id,
        redirect_uri: query.redirect_uri.as_deref().unwrap_or(""),
        state: query.state.as_deref().unwrap_or(""),
        resource: query.resource.as_deref().unwrap_or(""),
        code_challenge: query.code_challenge.as_deref().unwrap_or(""),
        code_challenge_method: query.code_challenge_method.as_deref().unwrap_or(""),
        csrf_state: &csrf_state,
    });
    (jar.add(cookie.build()), Html(page)).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeForm {
    #[serde(default)]
    pub csrf_state: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// POST /oauth/authorize — the core transition: open the frob handshake
/// and hand the user the intermediate page
pub async fn authorize_submit(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<AuthorizeForm>,
) -> Response {
    let client_id = form.client_id.clone().unwrap_or_default();

    // Precondition 1: double-submit CSRF. The cookie must match the form
    // field, and the token must validate (one-time, client-bound).
    let Some(cookie) = jar.get(CSRF_COOKIE) else {
        return authorize_error(StatusCode::BAD_REQUEST, "Missing CSRF cookie.");
    };
    let csrf_state = form.csrf_state.clone().unwrap_or_default();
    if csrf_state.is_empty() || csrf_state != cookie.value() {
        return authorize_error(StatusCode::BAD_REQUEST, "CSRF state mismatch.");
    }
    if !state.csrf.validate(&csrf_state, &client_id).await {
        return authorize_error(StatusCode::BAD_REQUEST, "CSRF state expired or already used.");
    }

    // Precondition 2: PKCE method is S256 when present.
    if let Some(method) = form.code_challenge_method.as_deref() {
        if !method.is_empty() && method != "S256" {
            return authorize_error(
                StatusCode::BAD_REQUEST,
                "Unsupported code_challenge_method; only S256 is supported.",
            );
        }
    }

    // Precondition 3: the requested audience, when present, must be this
    // server's protected resource.
    if let Some(resource) = form.resource.as_deref() {
        if !resource.is_empty() && !resource.starts_with(&state.config.resource_url()) {
            return authorize_error(StatusCode::BAD_REQUEST, "Unknown resource parameter.");
        }
    }

    // Open the upstream handshake before touching the session table; the
    // table lock is never held across this call.
    let frob = match state.upstream.request_frob().await {
        Ok(frob) => frob,
        Err(err) => {
            warn!(error = %err, "frob request failed");
            return upstream_error_page(&err);
        }
    };

    let code = generate_code();
    let session = AuthSession {
        code: code.clone(),
        frob: frob.clone(),
        state: form.state.clone().unwrap_or_default(),
        redirect_uri: form.redirect_uri.clone().unwrap_or_default(),
        client_id,
        resource: none_if_empty(form.resource),
        code_challenge: none_if_empty(form.code_challenge),
        code_challenge_method: none_if_empty(form.code_challenge_method),
        api_key_hint: none_if_empty(form.api_key),
        token: None,
    };
    state.sessions.insert(session).await;
    debug!(%code, "authorization session created");

    let auth_url = state.upstream.build_auth_url(UPSTREAM_PERMS, &frob);
    let jar = jar.remove(Cookie::build((CSRF_COOKIE, "")).path("/").build());
    (jar, Html(html::intermediate_page(&auth_url, &code))).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct CodeQuery {
    #[serde(default)]
    pub code: Option<String>,
}

/// GET /oauth/check-auth — poll whether the user has granted access
pub async fn check_auth(
    State(state): State<AppState>,
    Query(query): Query<CodeQuery>,
) -> Response {
    let Some(code) = query.code.filter(|code| !code.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(CheckAuthResponse::failed("missing code parameter")),
        )
            .into_response();
    };

    match state.sessions.begin_exchange(&code).await {
        ExchangeTicket::NotFound => (
            StatusCode::BAD_REQUEST,
            Json(CheckAuthResponse::failed("unknown or expired code")),
        )
            .into_response(),
        ExchangeTicket::AlreadyAuthorized => Json(CheckAuthResponse::authorized()).into_response(),
        // Another poll holds the exchange; report pending rather than
        // racing a second upstream call.
        ExchangeTicket::Busy => Json(CheckAuthResponse::pending()).into_response(),
        ExchangeTicket::Ready(frob) => match state.upstream.exchange_frob(&frob).await {
            Ok(token) => {
                state.sessions.finish_exchange(&code, Some(token)).await;
                debug!(%code, "frob exchanged");
                Json(CheckAuthResponse::authorized()).into_response()
            }
            Err(err) if err.is_pending() => {
                state.sessions.finish_exchange(&code, None).await;
                Json(CheckAuthResponse::pending()).into_response()
            }
            Err(err) => {
                state.sessions.finish_exchange(&code, None).await;
                warn!(%code, error = %err, "frob exchange failed");
                Json(CheckAuthResponse::failed(err.to_string())).into_response()
            }
        },
    }
}

/// GET /oauth/callback — bounce the authorized user back to the client
pub async fn callback(State(state): State<AppState>, Query(query): Query<CodeQuery>) -> Response {
    let Some(code) = query.code.filter(|code| !code.is_empty()) else {
        return authorize_error(StatusCode::BAD_REQUEST, "Missing code parameter.");
    };
    let Some(session) = state.sessions.get(&code).await else {
        return authorize_error(StatusCode::BAD_REQUEST, "Unknown or expired code.");
    };
    if session.token.is_none() {
        return authorize_error(StatusCode::BAD_REQUEST, "Authorization is not complete yet.");
    }

    let separator = if session.redirect_uri.contains('?') { '&' } else { '?' };
    let location = format!(
        "{}{}code={}&state={}",
        session.redirect_uri,
        separator,
        urlencoding::encode(&code),
        urlencoding::encode(&session.state),
    );
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenForm {
    #[serde(default)]
    pub grant_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
}

/// POST /oauth/token — exchange the code for a bearer
pub async fn token(State(state): State<AppState>, Form(form): Form<TokenForm>) -> Response {
    if form.grant_type.as_deref() != Some("authorization_code") {
        let grant = form.grant_type.unwrap_or_default();
        return token_failure(FacadeError::UnsupportedGrantType(grant));
    }
    let Some(code) = form.code.filter(|code| !code.is_empty()) else {
        return token_failure(FacadeError::invalid_grant("missing authorization code"));
    };
    let Some(session) = state.sessions.get(&code).await else {
        return token_failure(FacadeError::invalid_grant(
            "unknown or expired authorization code",
        ));
    };

    // PKCE: a committed challenge requires a matching verifier.
    if let Some(challenge) = &session.code_challenge {
        match form.code_verifier.as_deref() {
            Some(verifier) if pkce::verify_challenge(verifier, challenge) => {}
            Some(_) => {
                return token_failure(FacadeError::invalid_grant("PKCE verification failed"));
            }
            None => {
                return token_failure(FacadeError::invalid_grant("code_verifier is required"));
            }
        }
    }

    // Make sure the upstream token is resolved, exchanging inline when
    // the poller has not done it yet.
    let upstream_token = match session.token {
        Some(token) => token,
        None => match state.sessions.begin_exchange(&code).await {
            ExchangeTicket::AlreadyAuthorized => {
                match state.sessions.get(&code).await.and_then(|s| s.token) {
                    Some(token) => token,
                    None => {
                        return token_failure(FacadeError::invalid_grant(
                            "unknown or expired authorization code",
                        ));
                    }
                }
            }
            ExchangeTicket::Busy => {
                return token_failure(FacadeError::AuthorizationPending);
            }
            ExchangeTicket::NotFound => {
                return token_failure(FacadeError::invalid_grant(
                    "unknown or expired authorization code",
                ));
            }
            ExchangeTicket::Ready(frob) => match state.upstream.exchange_frob(&frob).await {
                Ok(token) => {
                    state.sessions.finish_exchange(&code, Some(token.clone())).await;
                    token
                }
                Err(err) if err.is_pending() => {
                    state.sessions.finish_exchange(&code, None).await;
                    return token_failure(FacadeError::AuthorizationPending);
                }
                Err(err @ (RtmError::ServiceUnavailable | RtmError::Http { .. })) => {
                    state.sessions.finish_exchange(&code, None).await;
                    warn!(%code, error = %err, "upstream unavailable during token exchange");
                    return token_failure(FacadeError::UpstreamUnavailable);
                }
                Err(err) => {
                    state.sessions.finish_exchange(&code, None).await;
                    return token_failure(FacadeError::invalid_grant(err.to_string()));
                }
            },
        },
    };

    // Single-use gate: removing the session is atomic, so of two
    // concurrent requests only one reaches the mint below. The row is
    // gone before the response is serialized.
    let Some(consumed) = state.sessions.take(&code).await else {
        return token_failure(FacadeError::invalid_grant("authorization code already used"));
    };
    let upstream_token = consumed.token.unwrap_or(upstream_token);

    let bearer = generate_bearer();
    if let Err(err) = state.bearers.store(&bearer, &upstream_token).await {
        warn!(error = %err, "bearer store write failed");
        return token_failure(FacadeError::internal("failed to persist access token"));
    }
    info!(client_id = %consumed.client_id, "access token issued");
    Json(TokenResponse::bearer(bearer, state.bearer_ttl_secs)).into_response()
}

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

fn authorize_error(status: StatusCode, reason: &str) -> Response {
    (status, Html(html::error_page(reason))).into_response()
}

fn upstream_error_page(err: &RtmError) -> Response {
    let status = match err {
        RtmError::ServiceUnavailable | RtmError::Http { .. } | RtmError::Malformed(_) => {
            StatusCode::BAD_GATEWAY
        }
        RtmError::Api { .. } => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Html(html::error_page(&format!("Upstream error: {err}"))),
    )
        .into_response()
}

/// Translate a facade error into the canonical OAuth token-endpoint
/// JSON body and status.
fn token_failure(err: FacadeError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(TokenErrorResponse::new(err.oauth_code(), err.to_string())),
    )
        .into_response()
}

fn none_if_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
