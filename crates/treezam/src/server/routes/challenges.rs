use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use crate::game::{self, ProgressUpdate};
use crate::model::NewChallenge;
use crate::server::{ApiError, AppState, AuthUser};

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/{id}/join", post(join))
        .route("/{id}/update-progress", post(update_progress))
}

fn challenge_id(id: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    id.map(|Path(id)| id)
        .map_err(|_| ApiError::not_found("Challenge not found"))
}

async fn list(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let challenges = state
        .with_storage(move |s| game::list_challenges(s, user.id))
        .await?;
    Ok(Json(json!({ "challenges": challenges })))
}

async fn create(
    State(state): State<AppState>,
    _: AuthUser,
    payload: Result<Json<NewChallenge>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(new) = payload?;
    let rules = *state.rules();

    let challenge = state
        .with_storage(move |s| game::create_challenge(s, &rules, new, Utc::now()))
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "challenge": challenge }))))
}

async fn join(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let id = challenge_id(id)?;
    let challenge = state
        .with_storage(move |s| game::join_challenge(s, id, user.id, Utc::now()))
        .await?;
    Ok(Json(json!({
        "message": "Successfully joined challenge",
        "challenge": challenge,
    })))
}

async fn update_progress(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ProgressUpdate>, ApiError> {
    let id = challenge_id(id)?;
    let rules = *state.rules();
    let update = state
        .with_storage(move |s| game::refresh_challenge_progress(s, &rules, id, user.id, Utc::now()))
        .await?;
    Ok(Json(update))
}
