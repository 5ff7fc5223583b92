use thiserror::Error;

/// FCM client error types.
#[derive(Error, Debug)]
pub enum FcmError {
    /// The provider returned an explicit error response.
    #[error("FCM API error: status {status}, code {error_code:?}: {message}")]
    Api {
        /// HTTP status code of the response.
        status: u16,
        /// FCM-specific error code, e.g. `UNREGISTERED` or `UNAVAILABLE`.
        error_code: Option<String>,
        message: String,
    },

    /// The request never produced a provider response.
    #[error("FCM request failed: {0}")]
    Http(String),

    /// The bounded delivery timeout elapsed.
    #[error("FCM request timed out")]
    Timeout,

    /// OAuth2 token exchange with the service account failed.
    #[error("failed to get access token: {0}")]
    Token(String),

    /// The service account key could not be loaded or parsed.
    #[error("invalid service account credentials: {0}")]
    Credentials(String),

    /// The provider answered with something we could not interpret.
    #[error("unexpected FCM response: {0}")]
    Response(String),
}

impl From<FcmError> for String {
    fn from(err: FcmError) -> Self {
        err.to_string()
    }
}
