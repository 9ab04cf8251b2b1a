use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRef, Query, State},
    http::{header, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use lazy_static::lazy_static;
use regex::Regex;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginRequest, MessageResponse, OAuthCallbackQuery, RegisterRequest},
        extractors::{session_cookie, AuthUser, SESSION_COOKIE},
        github::{resolve_identity, AUTHORIZE_URL},
        password::{hash_password, verify_password},
        repo_types::{LoginStatus, NewUser},
        tokens::SessionKeys,
    },
    error::AuthError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .merge(
            Router::new()
                .route("/protected", get(protected))
                .layer(no_store()),
        )
}

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/oauth/github", get(github_redirect))
        .route("/oauth/github/callback", get(github_callback))
        .layer(no_store())
}

fn no_store() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    )
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AuthError> {
    payload.name = payload.name.trim().to_string();
    payload.email = payload.email.trim().to_lowercase();

    if payload.name.is_empty() || payload.email.is_empty() || payload.password.is_empty() {
        return Err(AuthError::Validation("All fields are required.".into()));
    }
    if !is_valid_email(&payload.email) {
        warn!("invalid email on register");
        return Err(AuthError::Validation("Invalid email.".into()));
    }

    // Pre-checks give the friendlier per-field message; the unique
    // constraints remain the backstop for concurrent registrations.
    if state.store.find_by_name(&payload.name).await?.is_some() {
        return Err(AuthError::DuplicateKey("Name already exists.".into()));
    }
    if state.store.find_by_email(&payload.email).await?.is_some() {
        return Err(AuthError::DuplicateKey("Email already exists.".into()));
    }

    let hash = hash_password(&payload.password)?;
    let new = NewUser::manual(payload.name, payload.email, hash);
    let user = state.store.create(&new).await?;

    info!(user_id = %user.id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "User registered successfully.",
        }),
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    Json(mut payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<MessageResponse>), AuthError> {
    let ip = addr.ip().to_string();
    payload.email = payload.email.trim().to_lowercase();

    if payload.email.is_empty() || payload.password.is_empty() {
        state
            .store
            .record_login(None, &ip, LoginStatus::Failure, "Missing fields")
            .await;
        return Err(AuthError::Validation(
            "Email and password are required.".into(),
        ));
    }

    let user = match state.store.find_by_email(&payload.email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            state
                .store
                .record_login(None, &ip, LoginStatus::Failure, "User not found")
                .await;
            return Err(AuthError::InvalidCredentials);
        }
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            state
                .store
                .record_login(None, &ip, LoginStatus::Failure, "Server error")
                .await;
            return Err(AuthError::ServerError(e));
        }
    };

    // OAuth-method accounts have no local password; the response stays as
    // generic as a wrong password.
    let Some(stored_hash) = user.password_hash.as_deref() else {
        state
            .store
            .record_login(Some(user.id), &ip, LoginStatus::Failure, "Invalid password")
            .await;
        return Err(AuthError::InvalidCredentials);
    };

    match verify_password(&payload.password, stored_hash) {
        Ok(true) => {}
        Ok(false) => {
            state
                .store
                .record_login(Some(user.id), &ip, LoginStatus::Failure, "Invalid password")
                .await;
            return Err(AuthError::InvalidCredentials);
        }
        Err(e) => {
            error!(error = %e, "verify_password failed");
            state
                .store
                .record_login(Some(user.id), &ip, LoginStatus::Failure, "Server error")
                .await;
            return Err(AuthError::ServerError(e));
        }
    }

    let keys = SessionKeys::from_ref(&state);
    let (token, ttl) = match keys.sign_session(user.id, payload.remember_me) {
        Ok(signed) => signed,
        Err(e) => {
            error!(error = %e, "session sign failed");
            state
                .store
                .record_login(Some(user.id), &ip, LoginStatus::Failure, "Server error")
                .await;
            return Err(AuthError::ServerError(e));
        }
    };

    state
        .store
        .record_login(Some(user.id), &ip, LoginStatus::Success, "Login successful")
        .await;

    info!(user_id = %user.id, remember_me = payload.remember_me, "user logged in");
    Ok((
        jar.add(session_cookie(token, ttl)),
        Json(MessageResponse {
            message: "Login successful.",
        }),
    ))
}

pub async fn logout(
    AuthUser(user_id): AuthUser,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    info!(user_id = %user_id, "user logged out");
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Json(MessageResponse {
            message: "Logged out successfully.",
        }),
    )
}

pub async fn protected(AuthUser(user_id): AuthUser) -> Json<MessageResponse> {
    debug!(user_id = %user_id, "protected route hit");
    Json(MessageResponse {
        message: "Authenticated.",
    })
}

pub async fn github_redirect(
    State(state): State<AppState>,
) -> (StatusCode, [(header::HeaderName, String); 1]) {
    let location = format!(
        "{AUTHORIZE_URL}?client_id={}&scope=user%3Aemail",
        state.config.github.client_id
    );
    (StatusCode::FOUND, [(header::LOCATION, location)])
}

#[instrument(skip(state, jar, query))]
pub async fn github_callback(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<(StatusCode, CookieJar, [(header::HeaderName, String); 1]), AuthError> {
    let ip = addr.ip().to_string();

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        state
            .store
            .record_login(None, &ip, LoginStatus::Failure, "No code provided")
            .await;
        return Err(AuthError::Upstream("No code provided".into()));
    };

    let identity = match resolve_identity(state.github.as_ref(), &code).await {
        Ok(identity) => identity,
        Err(e) => {
            let reason = match &e {
                AuthError::Upstream(_) => "Failed to retrieve access token",
                _ => "OAuth login failed",
            };
            state
                .store
                .record_login(None, &ip, LoginStatus::Failure, reason)
                .await;
            return Err(e);
        }
    };

    let user = match state.store.find_by_github_id(&identity.github_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            // First login with this identity. A verified email already owned
            // by another account blocks linking; nothing is created.
            if let Some(email) = &identity.email {
                match state.store.find_by_email(email).await {
                    Ok(Some(_)) => {
                        state
                            .store
                            .record_login(
                                None,
                                &ip,
                                LoginStatus::Failure,
                                "Email already associated with another user",
                            )
                            .await;
                        return Err(AuthError::EmailConflict);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(error = %e, "find_by_email failed");
                        state
                            .store
                            .record_login(None, &ip, LoginStatus::Failure, "OAuth login failed")
                            .await;
                        return Err(AuthError::OAuthFailed);
                    }
                }
            }

            let new = NewUser::github(
                identity.login.clone(),
                identity.email.clone(),
                identity.github_id.clone(),
            );
            match state.store.create(&new).await {
                Ok(user) => {
                    info!(user_id = %user.id, github_id = %identity.github_id, "oauth user created");
                    user
                }
                Err(e) => {
                    error!(error = %e, "oauth user create failed");
                    state
                        .store
                        .record_login(None, &ip, LoginStatus::Failure, "OAuth login failed")
                        .await;
                    return Err(AuthError::OAuthFailed);
                }
            }
        }
        Err(e) => {
            error!(error = %e, "find_by_github_id failed");
            state
                .store
                .record_login(None, &ip, LoginStatus::Failure, "OAuth login failed")
                .await;
            return Err(AuthError::OAuthFailed);
        }
    };

    let keys = SessionKeys::from_ref(&state);
    let (token, ttl) = match keys.sign_session(user.id, query.remember_me) {
        Ok(signed) => signed,
        Err(e) => {
            error!(error = %e, "session sign failed");
            state
                .store
                .record_login(Some(user.id), &ip, LoginStatus::Failure, "OAuth login failed")
                .await;
            return Err(AuthError::OAuthFailed);
        }
    };

    state
        .store
        .record_login(
            Some(user.id),
            &ip,
            LoginStatus::Success,
            "OAuth login successful",
        )
        .await;

    info!(user_id = %user.id, "oauth login");
    let home = format!("{}/Home", state.config.frontend_origin);
    Ok((
        StatusCode::FOUND,
        jar.add(session_cookie(token, ttl)),
        [(header::LOCATION, home)],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::github::{GithubClient, GithubEmail, GithubProfile};
    use crate::auth::repo::AuthStore;
    use crate::auth::repo_types::{AuthMethod, User};
    use axum::async_trait;
    use std::sync::{Arc, Mutex};
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[derive(Debug, Clone)]
    struct Recorded {
        user_id: Option<Uuid>,
        status: LoginStatus,
        reason: String,
    }

    /// In-memory store with the same uniqueness rules as the real tables.
    #[derive(Default)]
    struct MemStore {
        users: Mutex<Vec<User>>,
        attempts: Mutex<Vec<Recorded>>,
    }

    impl MemStore {
        fn seed_manual(&self, name: &str, email: &str, password: &str) -> Uuid {
            let user = User {
                id: Uuid::new_v4(),
                name: name.into(),
                email: Some(email.into()),
                auth_method: AuthMethod::Manual.as_str().into(),
                password_hash: Some(hash_password(password).expect("hash")),
                github_id: None,
                created_at: OffsetDateTime::now_utc(),
            };
            let id = user.id;
            self.users.lock().unwrap().push(user);
            id
        }

        fn attempts(&self) -> Vec<Recorded> {
            self.attempts.lock().unwrap().clone()
        }

        fn user_count(&self) -> usize {
            self.users.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AuthStore for MemStore {
        async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<User>> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.name == name)
                .cloned())
        }
        async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.email.as_deref() == Some(email))
                .cloned())
        }
        async fn find_by_github_id(&self, github_id: &str) -> anyhow::Result<Option<User>> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.github_id.as_deref() == Some(github_id))
                .cloned())
        }
        async fn create(&self, new: &NewUser) -> Result<User, AuthError> {
            new.validate()?;
            let mut users = self.users.lock().unwrap();
            if users.iter().any(|u| u.name == new.name) {
                return Err(AuthError::DuplicateKey("Name already exists.".into()));
            }
            if new.email.is_some() && users.iter().any(|u| u.email == new.email) {
                return Err(AuthError::DuplicateKey("Email already exists.".into()));
            }
            if new.github_id.is_some() && users.iter().any(|u| u.github_id == new.github_id) {
                return Err(AuthError::DuplicateKey("GitHub account already linked.".into()));
            }
            let user = User {
                id: Uuid::new_v4(),
                name: new.name.clone(),
                email: new.email.clone(),
                auth_method: new.auth_method.as_str().into(),
                password_hash: new.password_hash.clone(),
                github_id: new.github_id.clone(),
                created_at: OffsetDateTime::now_utc(),
            };
            users.push(user.clone());
            Ok(user)
        }
        async fn record_login(
            &self,
            user_id: Option<Uuid>,
            _ip_address: &str,
            status: LoginStatus,
            reason: &str,
        ) {
            self.attempts.lock().unwrap().push(Recorded {
                user_id,
                status,
                reason: reason.into(),
            });
        }
    }

    struct StubGithub {
        github_id: u64,
        login: &'static str,
        emails: Vec<GithubEmail>,
    }

    #[async_trait]
    impl GithubClient for StubGithub {
        async fn exchange_code(&self, _code: &str) -> anyhow::Result<Option<String>> {
            Ok(Some("t0k3n".into()))
        }
        async fn fetch_profile(&self, _access_token: &str) -> anyhow::Result<GithubProfile> {
            Ok(GithubProfile {
                id: self.github_id,
                login: self.login.into(),
            })
        }
        async fn fetch_emails(&self, _access_token: &str) -> anyhow::Result<Vec<GithubEmail>> {
            Ok(self.emails.clone())
        }
    }

    fn primary_verified(addr: &str) -> GithubEmail {
        GithubEmail {
            email: addr.into(),
            primary: true,
            verified: true,
        }
    }

    fn octocat(emails: Vec<GithubEmail>) -> Arc<StubGithub> {
        Arc::new(StubGithub {
            github_id: 583231,
            login: "octocat",
            emails,
        })
    }

    fn client_addr() -> ConnectInfo<SocketAddr> {
        ConnectInfo("127.0.0.1:4000".parse().unwrap())
    }

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
            remember_me: false,
        }
    }

    fn callback_query(code: Option<&str>) -> Query<OAuthCallbackQuery> {
        Query(OAuthCallbackQuery {
            code: code.map(Into::into),
            remember_me: false,
        })
    }

    #[tokio::test]
    async fn each_login_outcome_records_exactly_one_attempt() {
        let store = Arc::new(MemStore::default());
        let user_id = store.seed_manual("alice", "alice@example.com", "hunter2-hunter2");
        let state = AppState::fake_with(store.clone(), octocat(vec![]));

        let err = login(
            State(state.clone()),
            client_addr(),
            CookieJar::new(),
            Json(login_request("", "")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        let err = login(
            State(state.clone()),
            client_addr(),
            CookieJar::new(),
            Json(login_request("bob@example.com", "whatever")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let err = login(
            State(state.clone()),
            client_addr(),
            CookieJar::new(),
            Json(login_request("alice@example.com", "wrong-password")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let (jar, _body) = login(
            State(state),
            client_addr(),
            CookieJar::new(),
            Json(login_request("alice@example.com", "hunter2-hunter2")),
        )
        .await
        .expect("login should succeed");
        assert!(jar.get(SESSION_COOKIE).is_some());

        // Four attempts, four audit entries, one each.
        let attempts = store.attempts();
        let reasons: Vec<&str> = attempts.iter().map(|a| a.reason.as_str()).collect();
        assert_eq!(
            reasons,
            [
                "Missing fields",
                "User not found",
                "Invalid password",
                "Login successful"
            ]
        );
        assert_eq!(attempts[1].user_id, None);
        assert_eq!(attempts[2].user_id, Some(user_id));
        assert_eq!(attempts[2].status, LoginStatus::Failure);
        assert_eq!(attempts[3].status, LoginStatus::Success);
    }

    #[tokio::test]
    async fn register_writes_no_audit_and_login_roundtrips() {
        let store = Arc::new(MemStore::default());
        let state = AppState::fake_with(store.clone(), octocat(vec![]));

        let (status, _body) = register(
            State(state.clone()),
            Json(RegisterRequest {
                name: "alice".into(),
                email: "Alice@Example.com".into(),
                password: "hunter2-hunter2".into(),
            }),
        )
        .await
        .expect("register should succeed");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(store.attempts().len(), 0);

        // Stored lowercased; login with the canonical form succeeds.
        let (jar, _body) = login(
            State(state),
            client_addr(),
            CookieJar::new(),
            Json(login_request("alice@example.com", "hunter2-hunter2")),
        )
        .await
        .expect("login should succeed");
        assert!(jar.get(SESSION_COOKIE).is_some());
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn register_rejects_duplicate_name() {
        let store = Arc::new(MemStore::default());
        let state = AppState::fake_with(store.clone(), octocat(vec![]));

        let payload = |email: &str| RegisterRequest {
            name: "alice".into(),
            email: email.into(),
            password: "hunter2-hunter2".into(),
        };
        register(State(state.clone()), Json(payload("first@example.com")))
            .await
            .expect("first register");
        let err = register(State(state), Json(payload("second@example.com")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateKey(_)));
        assert_eq!(err.to_string(), "Name already exists.");
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn oauth_email_conflict_creates_no_user_and_audits_once() {
        let store = Arc::new(MemStore::default());
        store.seed_manual("alice", "alice@example.com", "hunter2-hunter2");
        // Provider reports the conflicting address in different case.
        let state = AppState::fake_with(
            store.clone(),
            octocat(vec![primary_verified("Alice@Example.com")]),
        );

        let err = github_callback(
            State(state),
            client_addr(),
            CookieJar::new(),
            callback_query(Some("c0de")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::EmailConflict));

        assert_eq!(store.user_count(), 1);
        let attempts = store.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].reason, "Email already associated with another user");
        assert_eq!(attempts[0].status, LoginStatus::Failure);
    }

    #[tokio::test]
    async fn first_oauth_login_creates_exactly_one_github_user() {
        let store = Arc::new(MemStore::default());
        let state = AppState::fake_with(
            store.clone(),
            octocat(vec![primary_verified("Octo@Example.com")]),
        );

        let (status, jar, _location) = github_callback(
            State(state),
            client_addr(),
            CookieJar::new(),
            callback_query(Some("c0de")),
        )
        .await
        .expect("callback should succeed");
        assert_eq!(status, StatusCode::FOUND);
        assert!(jar.get(SESSION_COOKIE).is_some());

        assert_eq!(store.user_count(), 1);
        {
            let users = store.users.lock().unwrap();
            assert_eq!(users[0].auth_method, "github");
            assert_eq!(users[0].github_id.as_deref(), Some("583231"));
            assert_eq!(users[0].email.as_deref(), Some("octo@example.com"));
            assert!(users[0].password_hash.is_none());
        }
        let attempts = store.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].reason, "OAuth login successful");
        assert_eq!(attempts[0].status, LoginStatus::Success);
    }

    #[tokio::test]
    async fn returning_oauth_identity_does_not_create_a_second_user() {
        let store = Arc::new(MemStore::default());
        let state = AppState::fake_with(
            store.clone(),
            octocat(vec![primary_verified("octo@example.com")]),
        );

        for _ in 0..2 {
            github_callback(
                State(state.clone()),
                client_addr(),
                CookieJar::new(),
                callback_query(Some("c0de")),
            )
            .await
            .expect("callback should succeed");
        }

        assert_eq!(store.user_count(), 1);
        let attempts = store.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts
            .iter()
            .all(|a| a.reason == "OAuth login successful"));
    }

    #[tokio::test]
    async fn callback_without_code_audits_no_code_provided() {
        let store = Arc::new(MemStore::default());
        let state = AppState::fake_with(store.clone(), octocat(vec![]));

        let err = github_callback(
            State(state),
            client_addr(),
            CookieJar::new(),
            callback_query(None),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::Upstream(_)));

        assert_eq!(store.user_count(), 0);
        let attempts = store.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].reason, "No code provided");
    }

    #[tokio::test]
    async fn protected_and_oauth_routes_answer_no_store() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let store = Arc::new(MemStore::default());
        let state = AppState::fake_with(store, octocat(vec![]));
        let app = crate::auth::router().with_state(state);

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            res.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );

        let res = app
            .oneshot(
                Request::builder()
                    .uri("/oauth/github")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(
            res.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
    }

    #[test]
    fn accepts_plain_addresses() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("first.last@sub.example.org"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email("user@nodot"));
    }

    #[test]
    fn message_response_serializes_as_json_message() {
        let body = MessageResponse {
            message: "Login successful.",
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"message":"Login successful."}"#);
    }
}
