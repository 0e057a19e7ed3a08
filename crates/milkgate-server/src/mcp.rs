//! Protected JSON-RPC dispatch
//!
//! Requests reaching this handler carry a validated bearer; the
//! middleware attached the mapped upstream auth token as a request
//! extension. The full tool registry lives outside the facade — this
//! dispatcher serves the facade's own methods and reports upstream
//! backoff with `Retry-After`.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use milkgate_core::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

use crate::middleware::UpstreamToken;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct TaskParams {
    #[serde(rename = "progressToken")]
    progress_token: String,
}

/// POST /mcp
pub async fn handle_mcp(
    State(state): State<AppState>,
    Extension(UpstreamToken(upstream_token)): Extension<UpstreamToken>,
    Json(request): Json<JsonRpcRequest>,
) -> Response {
    debug!(method = %request.method, "mcp request");
    let id = request.id.clone();

    match request.method.as_str() {
        "ping" => Json(JsonRpcResponse::success(json!({}), id)).into_response(),

        "auth/validate" => {
            let valid = state.upstream.validate_token(&upstream_token).await;
            if !valid {
                // A rate-limited upstream surfaces as 502 with the
                // limiter's remaining backoff.
                if let Some(backoff) = state.upstream.backoff_remaining().await {
                    let retry_after = backoff.as_secs().max(1).to_string();
                    return (
                        StatusCode::BAD_GATEWAY,
                        [(header::RETRY_AFTER, retry_after)],
                        Json(JsonRpcResponse::error(
                            JsonRpcError::upstream_unavailable(
                                "upstream is rate limited; retry later".to_string(),
                            ),
                            id,
                        )),
                    )
                        .into_response();
                }
            }
            Json(JsonRpcResponse::success(json!({ "valid": valid }), id)).into_response()
        }

        "tasks/status" => match task_params(&request) {
            Ok(params) => match state.tasks.get(&params.progress_token).await {
                Some(task) => {
                    let progress = task.progress();
                    Json(JsonRpcResponse::success(
                        serde_json::to_value(progress).unwrap_or(json!({})),
                        id,
                    ))
                    .into_response()
                }
                None => Json(JsonRpcResponse::error(
                    JsonRpcError::invalid_params(Some(format!(
                        "unknown progress token: {}",
                        params.progress_token
                    ))),
                    id,
                ))
                .into_response(),
            },
            Err(response) => respond_error(response, id),
        },

        "tasks/cancel" => match task_params(&request) {
            Ok(params) => match state.tasks.get(&params.progress_token).await {
                Some(task) => {
                    task.cancel();
                    Json(JsonRpcResponse::success(
                        json!({ "cancelled": task.is_cancelled() }),
                        id,
                    ))
                    .into_response()
                }
                None => Json(JsonRpcResponse::success(json!({ "cancelled": false }), id))
                    .into_response(),
            },
            Err(response) => respond_error(response, id),
        },

        other => Json(JsonRpcResponse::error(
            JsonRpcError::method_not_found(other),
            id,
        ))
        .into_response(),
    }
}

fn task_params(request: &JsonRpcRequest) -> Result<TaskParams, JsonRpcError> {
    let params = request
        .params
        .clone()
        .ok_or_else(|| JsonRpcError::invalid_params(Some("params required".to_string())))?;
    serde_json::from_value(params)
        .map_err(|err| JsonRpcError::invalid_params(Some(err.to_string())))
}

fn respond_error(error: JsonRpcError, id: Option<milkgate_core::protocol::RequestId>) -> Response {
    Json(JsonRpcResponse::error(error, id)).into_response()
}
