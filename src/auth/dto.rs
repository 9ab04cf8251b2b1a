use serde::{Deserialize, Serialize};

/// Request body for user registration.
///
/// Fields default to empty so a missing field is reported by the handler
/// (with an audit-friendly message) instead of a bare deserialization error.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Request body for password login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, rename = "rememberMe")]
    pub remember_me: bool,
}

/// Query parameters on the OAuth callback.
#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    #[serde(default, rename = "rememberMe")]
    pub remember_me: bool,
}

/// Uniform JSON body for non-redirect responses.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
