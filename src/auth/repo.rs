use axum::async_trait;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::auth::repo_types::{LoginStatus, NewUser, User};
use crate::error::AuthError;

/// Persistence contract for the authentication core: equality lookups, a
/// unique-constrained insert, and the append-only login audit trail.
/// A trait for the same reason `GithubClient` is one: handler tests run
/// against an in-memory store instead of a live database.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_github_id(&self, github_id: &str) -> anyhow::Result<Option<User>>;

    /// Insert a new user after validating the auth-method invariant.
    ///
    /// Uniqueness of name, email and github id is the store's job: a race
    /// between two concurrent inserts resolves here as `DuplicateKey` for
    /// the loser, never as a second row.
    async fn create(&self, new: &NewUser) -> Result<User, AuthError>;

    /// Append one audit entry for a login attempt.
    ///
    /// Best effort: the login outcome has already been decided when this
    /// runs, so a failed write is logged and swallowed rather than allowed
    /// to change the response.
    async fn record_login(
        &self,
        user_id: Option<Uuid>,
        ip_address: &str,
        status: LoginStatus,
        reason: &str,
    );
}

/// Postgres-backed store.
pub struct PgAuthStore {
    db: PgPool,
}

impl PgAuthStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuthStore for PgAuthStore {
    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, auth_method, password_hash, github_id, created_at
            FROM users
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, auth_method, password_hash, github_id, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_github_id(&self, github_id: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, auth_method, password_hash, github_id, created_at
            FROM users
            WHERE github_id = $1
            "#,
        )
        .bind(github_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, new: &NewUser) -> Result<User, AuthError> {
        new.validate()?;
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, auth_method, password_hash, github_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, email, auth_method, password_hash, github_id, created_at
            "#,
        )
        .bind(&new.name)
        .bind(&new.email)
        .bind(new.auth_method.as_str())
        .bind(&new.password_hash)
        .bind(&new.github_id)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)?;
        Ok(user)
    }

    async fn record_login(
        &self,
        user_id: Option<Uuid>,
        ip_address: &str,
        status: LoginStatus,
        reason: &str,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO login_attempts (user_id, ip_address, status, reason)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(ip_address)
        .bind(status.as_str())
        .bind(reason)
        .execute(&self.db)
        .await;

        if let Err(e) = result {
            error!(error = %e, reason, "failed to record login attempt");
        }
    }
}

fn map_unique_violation(e: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            let message = match db_err.constraint() {
                Some("users_name_key") => "Name already exists.",
                Some("users_email_key") => "Email already exists.",
                Some("users_github_id_key") => "GitHub account already linked.",
                _ => "Value already exists.",
            };
            return AuthError::DuplicateKey(message.into());
        }
    }
    AuthError::Database(e)
}
