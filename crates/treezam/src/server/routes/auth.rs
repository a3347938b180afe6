use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use crate::auth::{self, Credentials, Registration, Session};
use crate::server::{ApiError, AppState, AuthUser};

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Registration>, JsonRejection>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let Json(registration) = payload?;
    let policy = *state.auth_policy();

    let account = state
        .compute(move || auth::prepare_account(&policy, &registration))
        .await?;
    let session = state
        .with_storage(move |s| auth::create_account(s, &policy, &account, Utc::now()))
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<Session>, ApiError> {
    let Json(credentials) = payload?;
    let policy = *state.auth_policy();

    let lookup = credentials.clone();
    let found = state
        .with_storage(move |s| auth::find_login(s, &lookup))
        .await?;
    let user = state
        .compute(move || auth::check_login(found, &credentials))
        .await?;
    let session = state
        .with_storage(move |s| auth::open_session(s, &policy, user, Utc::now()))
        .await?;
    Ok(Json(session))
}

async fn logout(
    State(state): State<AppState>,
    AuthUser { token, .. }: AuthUser,
) -> Result<Json<Value>, ApiError> {
    state.with_storage(move |s| auth::logout(s, &token)).await?;
    Ok(Json(json!({ "message": "Logged out successfully" })))
}
