use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, warn};

/// Error returned by every store, service and handler in the app.
///
/// The `Display` text is what the client sees in `{"error": "..."}`, so
/// variants carry user-facing messages only. Storage diagnostics live in
/// `Internal` and are logged, never sent.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed fields, bad column name. HTTP 400.
    #[error("{0}")]
    InvalidInput(String),

    /// Username or column name already taken. HTTP 409.
    #[error("{0}")]
    Conflict(String),

    /// Unknown identity or column. HTTP 404.
    #[error("{0}")]
    NotFound(String),

    /// Missing, malformed or expired token. HTTP 401.
    #[error("{0}")]
    Unauthenticated(String),

    /// Bad credentials at login; the same for unknown users and wrong passwords. HTTP 401.
    #[error("Invalid username or password")]
    Unauthorized,

    /// Valid token, insufficient role. HTTP 403.
    #[error("{0}")]
    Forbidden(String),

    /// Storage or other infrastructure failure. HTTP 500.
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthenticated(_) | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Routes that report every rejected input as 400 (register, create-user,
    /// create-column, delete-column) fold conflicts and misses into `InvalidInput`.
    pub fn into_bad_request(self) -> Self {
        match self {
            AppError::Conflict(msg) | AppError::NotFound(msg) => AppError::InvalidInput(msg),
            other => other,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(anyhow::Error::new(e))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(status = %rejection.status(), detail = %rejection.body_text(), "request body rejected");
        AppError::InvalidInput("Invalid request body".into())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        warn!(detail = %rejection.body_text(), "path parameter rejected");
        AppError::InvalidInput("Invalid path parameter".into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(e) = &self {
            error!(error = ?e, "internal error");
        }
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
