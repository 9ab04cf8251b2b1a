use axum::async_trait;
use serde::Deserialize;
use tracing::{debug, error};

use crate::config::GithubConfig;
use crate::error::AuthError;

pub const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";
const EMAILS_URL: &str = "https://api.github.com/user/emails";

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
}

/// Subset of the provider's user profile the linker needs.
#[derive(Debug, Deserialize)]
pub struct GithubProfile {
    pub id: u64,
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubEmail {
    pub email: String,
    pub primary: bool,
    pub verified: bool,
}

/// External identity facts needed to resolve a local account.
#[derive(Debug, Clone)]
pub struct GithubIdentity {
    pub github_id: String,
    pub login: String,
    pub email: Option<String>,
}

/// Provider surface used by the OAuth flow. A trait so tests can swap in
/// a fake without touching the network.
#[async_trait]
pub trait GithubClient: Send + Sync {
    /// Exchange an authorization code for an access token. `Ok(None)`
    /// means the provider answered but returned no token.
    async fn exchange_code(&self, code: &str) -> anyhow::Result<Option<String>>;
    async fn fetch_profile(&self, access_token: &str) -> anyhow::Result<GithubProfile>;
    async fn fetch_emails(&self, access_token: &str) -> anyhow::Result<Vec<GithubEmail>>;
}

/// Real GitHub client over `reqwest`.
pub struct GithubApi {
    http: reqwest::Client,
    config: GithubConfig,
}

impl GithubApi {
    pub fn new(http: reqwest::Client, config: GithubConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl GithubClient for GithubApi {
    async fn exchange_code(&self, code: &str) -> anyhow::Result<Option<String>> {
        let response = self
            .http
            .post(ACCESS_TOKEN_URL)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&serde_json::json!({
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
                "code": code,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<AccessTokenResponse>()
            .await?;
        Ok(response.access_token)
    }

    async fn fetch_profile(&self, access_token: &str) -> anyhow::Result<GithubProfile> {
        let profile = self
            .http
            .get(USER_URL)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json::<GithubProfile>()
            .await?;
        Ok(profile)
    }

    async fn fetch_emails(&self, access_token: &str) -> anyhow::Result<Vec<GithubEmail>> {
        let emails = self
            .http
            .get(EMAILS_URL)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<GithubEmail>>()
            .await?;
        Ok(emails)
    }
}

/// The address GitHub reports as both primary and verified, if any.
/// Unverified addresses are never linked to a local account. Lowercased,
/// since registration stores emails lowercased and the conflict lookup in
/// the callback compares them literally.
pub fn verified_primary_email(emails: &[GithubEmail]) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .map(|e| e.email.to_lowercase())
}

/// Walk the provider flow from authorization code to external identity:
/// exchange the code, then fetch the profile and the verified primary
/// email with the resulting access token.
pub async fn resolve_identity(
    client: &dyn GithubClient,
    code: &str,
) -> Result<GithubIdentity, AuthError> {
    let access_token = client.exchange_code(code).await.map_err(|e| {
        error!(error = %e, "github code exchange failed");
        AuthError::OAuthFailed
    })?;
    let Some(access_token) = access_token else {
        return Err(AuthError::Upstream(
            "Failed to retrieve access token".into(),
        ));
    };

    let profile = client.fetch_profile(&access_token).await.map_err(|e| {
        error!(error = %e, "github profile fetch failed");
        AuthError::OAuthFailed
    })?;
    let emails = client.fetch_emails(&access_token).await.map_err(|e| {
        error!(error = %e, "github email fetch failed");
        AuthError::OAuthFailed
    })?;

    let identity = GithubIdentity {
        github_id: profile.id.to_string(),
        login: profile.login,
        email: verified_primary_email(&emails),
    };
    debug!(github_id = %identity.github_id, login = %identity.login, "github identity resolved");
    Ok(identity)
}
