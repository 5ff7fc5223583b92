use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Bad or missing credential; the connection or request is refused.
    #[error("unauthorized")]
    Unauthorized,

    /// Room action attempted by someone who is not a conversation participant.
    #[error("not a member of this conversation")]
    NotAMember,

    /// Action attempted by someone who lacks the right to perform it.
    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    /// The durable store rejected a write; the surrounding operation aborts
    /// so no unpersisted state is ever broadcast.
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("push delivery error: {0}")]
    Push(String),

    /// Push endpoints are reachable but no provider credentials were
    /// configured at startup.
    #[error("push delivery is not configured")]
    PushUnavailable,

    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotAMember | AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::PushUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Persistence(_)
            | AppError::Database(_)
            | AppError::Push(_)
            | AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal details stay in the logs, not in the response body.
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "internal server error".to_string()
            }
            AppError::Persistence(e) => {
                tracing::error!(error = %e, "persistence failure");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<tiffin_fcm_shared::FcmError> for AppError {
    fn from(err: tiffin_fcm_shared::FcmError) -> Self {
        AppError::Push(err.to_string())
    }
}
