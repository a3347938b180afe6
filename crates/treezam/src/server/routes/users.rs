use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::game;
use crate::server::{ApiError, AppState, AuthUser};

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(me).put(update_me))
        .route("/stats", get(stats))
}

#[derive(Debug, Deserialize)]
struct ProfileUpdate {
    #[serde(default)]
    username: Option<String>,
}

async fn me(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let profile = state.with_storage(move |s| game::profile(s, user)).await?;
    Ok(Json(json!({ "user": profile })))
}

async fn stats(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let limit = state.config().game.recent_activity_limit;
    let report = state
        .with_storage(move |s| game::stats_report(s, &user, limit))
        .await?;
    Ok(Json(json!({ "stats": report })))
}

async fn update_me(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(update) = payload?;
    let user = state
        .with_storage(move |s| game::rename_user(s, &user, update.username.as_deref()))
        .await?;
    Ok(Json(json!({
        "user": { "id": user.id, "username": user.username, "email": user.email }
    })))
}
