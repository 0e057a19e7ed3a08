use thiserror::Error;

/// Errors from the authorization-flow plumbing
///
/// The CSRF and session tables report outcomes through their return
/// values; what surfaces here are the callback listener's failure
/// modes, which callers must distinguish to drive the flow.
#[derive(Error, Debug)]
pub enum AuthError {
    /// A second `start` while the listener is running
    #[error("callback server already running")]
    CallbackAlreadyRunning,

    #[error("callback server is not running")]
    CallbackNotRunning,

    #[error("timed out waiting for authorization callback")]
    CallbackTimeout,

    /// The redirect carried an upstream error parameter
    #[error("authorization denied: {0}")]
    Denied(String),

    #[error("callback channel closed before a redirect arrived")]
    CallbackClosed,

    #[error("failed to bind callback listener: {source}")]
    Bind {
        #[from]
        source: std::io::Error,
    },
}

/// Result type for authorization-flow operations
pub type AuthResult<T> = Result<T, AuthError>;
