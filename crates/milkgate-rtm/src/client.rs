//! Signed transport and frob operations for the RTM REST API

use crate::rate_limit::RateLimiter;
use crate::{RtmError, RtmResult, ERR_NOT_AUTHORIZED};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_REST_ENDPOINT: &str = "https://api.rememberthemilk.com/services/rest/";
const DEFAULT_AUTH_ENDPOINT: &str = "https://www.rememberthemilk.com/services/auth/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The seam between the OAuth facade and the upstream API.
///
/// The facade, middleware, and tests hold `Arc<dyn UpstreamAuthority>`;
/// [`RtmClient`] is the production implementation.
#[async_trait]
pub trait UpstreamAuthority: Send + Sync {
    /// Request a frob: the opaque handle the user authorizes upstream.
    async fn request_frob(&self) -> RtmResult<String>;

    /// Exchange an authorized frob for a long-lived auth token.
    ///
    /// Returns `RtmError::Api { code: 101, .. }` while the user has not
    /// yet granted access.
    async fn exchange_frob(&self, frob: &str) -> RtmResult<String>;

    /// Signed URL the user visits upstream to grant permission.
    fn build_auth_url(&self, perms: &str, frob: &str) -> String;

    /// Cheap authenticated call; any failure reads as invalid.
    async fn validate_token(&self, token: &str) -> bool;

    /// Remaining 503 backoff, if any. Drives `Retry-After`.
    async fn backoff_remaining(&self) -> Option<Duration>;
}

/// Client for the RTM REST API
///
/// Every outbound call is signed (sorted-parameter MD5) and gated by the
/// owned [`RateLimiter`].
pub struct RtmClient {
    http: reqwest::Client,
    api_key: String,
    api_secret: String,
    rest_endpoint: String,
    auth_endpoint: String,
    limiter: Arc<RateLimiter>,
}

impl RtmClient {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            rest_endpoint: DEFAULT_REST_ENDPOINT.to_string(),
            auth_endpoint: DEFAULT_AUTH_ENDPOINT.to_string(),
            limiter: Arc::new(RateLimiter::new()),
        }
    }

    /// Override the REST endpoint (tests point this at a local fake).
    pub fn with_rest_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.rest_endpoint = endpoint.into();
        self
    }

    /// Override the grant-page endpoint.
    pub fn with_auth_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.auth_endpoint = endpoint.into();
        self
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Sign a parameter list: sort pairs by key, concatenate `k1v1k2v2…`,
    /// prepend the shared secret, MD5-hex.
    ///
    /// The signature depends only on the set of pairs, never their order.
    pub fn sign(&self, params: &[(String, String)]) -> String {
        let mut sorted: Vec<&(String, String)> = params.iter().collect();
        sorted.sort();
        let mut buf = self.api_secret.clone();
        for (key, value) in sorted {
            buf.push_str(key);
            buf.push_str(value);
        }
        format!("{:x}", md5::compute(buf.as_bytes()))
    }

    /// Perform a signed REST call and return the `rsp` envelope payload.
    async fn call(
        &self,
        method: &str,
        extra: &[(&str, &str)],
        auth_token: Option<&str>,
    ) -> RtmResult<Value> {
        self.limiter.acquire().await;

        let mut params: Vec<(String, String)> = vec![
            ("method".to_string(), method.to_string()),
            ("api_key".to_string(), self.api_key.clone()),
            ("format".to_string(), "json".to_string()),
        ];
        if let Some(token) = auth_token {
            params.push(("auth_token".to_string(), token.to_string()));
        }
        for (key, value) in extra {
            params.push((key.to_string(), value.to_string()));
        }
        let sig = self.sign(&params);
        params.push(("api_sig".to_string(), sig));

        debug!(method, "calling upstream");
        let response = self
            .http
            .get(&self.rest_endpoint)
            .query(&params)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            self.limiter.handle_503().await;
            warn!(method, "upstream returned 503");
            return Err(RtmError::ServiceUnavailable);
        }

        let body: Value = response.json().await?;
        self.limiter.reset_backoff().await;
        envelope_result(body)
    }

    /// Remaining backoff from the owned limiter.
    pub async fn limiter_backoff(&self) -> Option<Duration> {
        self.limiter.backoff_remaining().await
    }

    /// Estimated wall time for `n` upstream calls.
    pub async fn estimate_batch(&self, n: usize) -> Duration {
        self.limiter.estimate_duration(n).await
    }

    /// Pace `n` upstream operations through the owned limiter.
    pub fn pace_batch(&self, n: usize) -> tokio::sync::mpsc::Receiver<()> {
        self.limiter.acquire_batch(n)
    }
}

/// Unwrap the RTM response envelope: `{"rsp": {"stat": "ok" | "fail", ...}}`.
fn envelope_result(body: Value) -> RtmResult<Value> {
    let rsp = body
        .get("rsp")
        .cloned()
        .ok_or_else(|| RtmError::Malformed("missing rsp envelope".to_string()))?;
    match rsp.get("stat").and_then(Value::as_str) {
        Some("ok") => Ok(rsp),
        Some("fail") => {
            let err = rsp.get("err").cloned().unwrap_or(Value::Null);
            // RTM encodes the code as a JSON string; tolerate numbers too.
            let code = match err.get("code") {
                Some(Value::String(s)) => s.parse().unwrap_or(-1),
                Some(Value::Number(n)) => n.as_i64().unwrap_or(-1),
                _ => -1,
            };
            let msg = err
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown upstream failure")
                .to_string();
            Err(RtmError::Api { code, msg })
        }
        _ => Err(RtmError::Malformed("missing rsp.stat".to_string())),
    }
}

#[async_trait]
impl UpstreamAuthority for RtmClient {
    async fn request_frob(&self) -> RtmResult<String> {
        let rsp = self.call("rtm.auth.getFrob", &[], None).await?;
        rsp.get("frob")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RtmError::Malformed("getFrob response missing frob".to_string()))
    }

    async fn exchange_frob(&self, frob: &str) -> RtmResult<String> {
        let rsp = self
            .call("rtm.auth.getToken", &[("frob", frob)], None)
            .await?;
        rsp.pointer("/auth/token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RtmError::Malformed("getToken response missing auth.token".to_string()))
    }

    fn build_auth_url(&self, perms: &str, frob: &str) -> String {
        let params = vec![
            ("api_key".to_string(), self.api_key.clone()),
            ("perms".to_string(), perms.to_string()),
            ("frob".to_string(), frob.to_string()),
        ];
        let sig = self.sign(&params);
        format!(
            "{}?api_key={}&perms={}&frob={}&api_sig={}",
            self.auth_endpoint,
            urlencoded(&self.api_key),
            urlencoded(perms),
            urlencoded(frob),
            sig
        )
    }

    async fn validate_token(&self, token: &str) -> bool {
        match self.call("rtm.auth.checkToken", &[], Some(token)).await {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "token validation failed");
                false
            }
        }
    }

    async fn backoff_remaining(&self) -> Option<Duration> {
        self.limiter.backoff_remaining().await
    }
}

fn urlencoded(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> RtmClient {
        RtmClient::new("key123", "secret456")
    }

    #[test]
    fn test_sign_is_order_independent() {
        let client = client();
        let forward = vec![
            ("method".to_string(), "rtm.test.echo".to_string()),
            ("api_key".to_string(), "key123".to_string()),
            ("format".to_string(), "json".to_string()),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(client.sign(&forward), client.sign(&reversed));
    }

    #[test]
    fn test_sign_shape_and_sensitivity() {
        let client = client();
        let params = vec![("frob".to_string(), "F1".to_string())];
        let sig = client.sign(&params);
        assert_eq!(sig.len(), 32);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));

        let other = vec![("frob".to_string(), "F2".to_string())];
        assert_ne!(sig, client.sign(&other));
    }

    #[test]
    fn test_build_auth_url_is_signed() {
        let url = client().build_auth_url("delete", "F1");
        assert!(url.starts_with("https://www.rememberthemilk.com/services/auth/?"));
        assert!(url.contains("api_key=key123"));
        assert!(url.contains("perms=delete"));
        assert!(url.contains("frob=F1"));
        assert!(url.contains("api_sig="));
    }

    #[test]
    fn test_envelope_ok() {
        let rsp = envelope_result(json!({"rsp": {"stat": "ok", "frob": "F1"}})).unwrap();
        assert_eq!(rsp["frob"], "F1");
    }

    #[test]
    fn test_envelope_fail_with_string_code() {
        let err = envelope_result(json!({
            "rsp": {"stat": "fail", "err": {"code": "101", "msg": "Invalid frob"}}
        }))
        .unwrap_err();
        match err {
            RtmError::Api { code, ref msg } => {
                assert_eq!(code, ERR_NOT_AUTHORIZED);
                assert_eq!(msg, "Invalid frob");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_pending());
    }

    #[test]
    fn test_envelope_malformed() {
        assert!(matches!(
            envelope_result(json!({"weird": true})),
            Err(RtmError::Malformed(_))
        ));
        assert!(matches!(
            envelope_result(json!({"rsp": {"frob": "F1"}})),
            Err(RtmError::Malformed(_))
        ));
    }
}
