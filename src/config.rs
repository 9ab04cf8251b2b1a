use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    /// Session lifetime without "remember me".
    pub session_ttl_minutes: i64,
    /// Session lifetime with "remember me".
    pub remember_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub github: GithubConfig,
    /// Browser frontend origin, used for CORS and the post-OAuth redirect.
    pub frontend_origin: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "gatehouse".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "gatehouse-users".into()),
            session_ttl_minutes: std::env::var("SESSION_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(10),
            remember_ttl_minutes: std::env::var("REMEMBER_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 7),
        };
        let github = GithubConfig {
            client_id: std::env::var("GITHUB_CLIENT_ID")?,
            client_secret: std::env::var("GITHUB_CLIENT_SECRET")?,
        };
        let frontend_origin =
            std::env::var("FRONTEND_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".into());
        Ok(Self {
            database_url,
            jwt,
            github,
            frontend_origin,
        })
    }
}
