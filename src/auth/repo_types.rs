use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AuthError;

/// How an account authenticates: a locally stored password hash, or an
/// external GitHub identity. Stored as lowercase text in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Manual,
    Github,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMethod::Manual => "manual",
            AuthMethod::Github => "github",
        }
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub auth_method: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub github_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Candidate user row. `validate` runs before every insert, so a row whose
/// auth method and credential fields disagree never reaches the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: Option<String>,
    pub auth_method: AuthMethod,
    pub password_hash: Option<String>,
    pub github_id: Option<String>,
}

impl NewUser {
    pub fn manual(name: String, email: String, password_hash: String) -> Self {
        Self {
            name,
            email: Some(email),
            auth_method: AuthMethod::Manual,
            password_hash: Some(password_hash),
            github_id: None,
        }
    }

    pub fn github(name: String, email: Option<String>, github_id: String) -> Self {
        Self {
            name,
            email,
            auth_method: AuthMethod::Github,
            password_hash: None,
            github_id: Some(github_id),
        }
    }

    /// Exactly one of {password hash, github id} must be populated,
    /// matching the auth method.
    pub fn validate(&self) -> Result<(), AuthError> {
        let fail = |msg: &str| Err(AuthError::Validation(msg.to_string()));
        match self.auth_method {
            AuthMethod::Manual => {
                if self.github_id.is_some() {
                    return fail("Manual users should not have a GitHub ID.");
                }
                if self.password_hash.is_none() {
                    return fail("Manual users must have a password.");
                }
            }
            AuthMethod::Github => {
                if self.github_id.is_none() {
                    return fail("GitHub users must have a GitHub ID.");
                }
                if self.password_hash.is_some() {
                    return fail("GitHub users should not have a password.");
                }
            }
        }
        Ok(())
    }
}

/// Outcome of one login attempt, as recorded in the audit trail. Audit
/// entries are insert-only; the core never reads them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    Success,
    Failure,
}

impl LoginStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoginStatus::Success => "success",
            LoginStatus::Failure => "failure",
        }
    }
}
