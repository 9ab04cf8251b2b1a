use crate::state::AppState;
use axum::Router;

mod dto;
pub mod extractors;
pub mod github;
pub mod handlers;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod tokens;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::oauth_routes())
}
