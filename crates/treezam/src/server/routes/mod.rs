//! `/api` route handlers, one module per resource.

use axum::Router;

use super::AppState;

mod auth;
mod challenges;
mod leaderboard;
mod trees;
mod users;

/// Every `/api` route.
pub(super) fn api() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router())
        .nest("/trees", trees::router())
        .nest("/challenges", challenges::router())
        .nest("/leaderboard", leaderboard::router())
        .nest("/users", users::router())
}
