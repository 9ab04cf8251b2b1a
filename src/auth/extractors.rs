use std::time::Duration;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tracing::warn;
use uuid::Uuid;

use crate::auth::tokens::SessionKeys;
use crate::error::AuthError;

/// Name of the session cookie held by the client.
pub const SESSION_COOKIE: &str = "token";

/// Build the HttpOnly session cookie with a Max-Age matching the token TTL.
pub fn session_cookie(token: String, ttl: Duration) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .path("/")
        .max_age(time::Duration::seconds(ttl.as_secs() as i64))
        .build()
}

/// Session gate: extracts the `token` cookie and verifies it, yielding the
/// bound user id. Any route taking this extractor is a protected route;
/// a missing or invalid token rejects the request with 401.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    SessionKeys: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = SessionKeys::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_owned())
            .ok_or(AuthError::Unauthenticated)?;

        let claims = keys.verify(&token).map_err(|_| {
            warn!("invalid or expired session token");
            AuthError::Unauthenticated
        })?;

        Ok(AuthUser(claims.sub))
    }
}
