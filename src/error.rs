use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by the authentication core.
///
/// Implements `IntoResponse`, so handlers can bubble these up with `?` and
/// the client always sees a JSON `{"message": ...}` body. Database and
/// internal failures log their detail server-side and send a generic message.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or malformed input (400).
    #[error("{0}")]
    Validation(String),

    /// Unique-constraint collision on registration (400).
    #[error("{0}")]
    DuplicateKey(String),

    /// Wrong email or password; deliberately does not say which (400).
    #[error("Invalid credentials.")]
    InvalidCredentials,

    /// Session gate rejection (401).
    #[error("Invalid or expired token.")]
    Unauthenticated,

    /// OAuth email already owned by another account (409).
    #[error("Email already associated with another account")]
    EmailConflict,

    /// Provider rejected an early OAuth stage (400).
    #[error("{0}")]
    Upstream(String),

    /// Provider or store failure mid-OAuth-flow (500).
    #[error("OAuth login failed")]
    OAuthFailed,

    /// Unexpected failure inside the password-login flow (500).
    #[error("An error occurred.")]
    ServerError(anyhow::Error),

    /// Unexpected database failure (500).
    #[error("Internal server error.")]
    Database(#[from] sqlx::Error),

    /// Any other unexpected failure (500).
    #[error("Internal server error.")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_)
            | AuthError::DuplicateKey(_)
            | AuthError::InvalidCredentials
            | AuthError::Upstream(_) => StatusCode::BAD_REQUEST,
            AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::EmailConflict => StatusCode::CONFLICT,
            AuthError::OAuthFailed
            | AuthError::ServerError(_)
            | AuthError::Database(_)
            | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::Database(e) => error!(error = %e, "database error"),
            AuthError::Internal(e) => error!(error = %e, "internal error"),
            AuthError::ServerError(e) => error!(error = %e, "login flow error"),
            _ => {}
        }
        let status = self.status();
        (status, Json(serde_json::json!({ "message": self.to_string() }))).into_response()
    }
}
