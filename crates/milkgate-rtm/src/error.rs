use thiserror::Error;

/// Errors from the upstream RTM API
#[derive(Error, Debug)]
pub enum RtmError {
    /// API-level failure (`rsp.stat == "fail"`). Code 101 is the
    /// well-known "not yet authorized" signal during the frob exchange.
    #[error("upstream API error {code}: {msg}")]
    Api { code: i64, msg: String },

    /// Upstream returned 503; the rate limiter has entered backoff.
    #[error("upstream service unavailable")]
    ServiceUnavailable,

    #[error("upstream transport error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    /// Response body did not match the expected envelope
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl RtmError {
    /// Whether this error means the user has not yet granted access.
    pub fn is_pending(&self) -> bool {
        matches!(self, RtmError::Api { code, .. } if *code == crate::ERR_NOT_AUTHORIZED)
    }
}
