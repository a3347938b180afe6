use axum::extract::rejection::PathRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::game::{self, IdentificationOutcome};
use crate::model::{GeoPoint, NewIdentification};
use crate::server::upload::{store_image, IdentifyForm};
use crate::server::{ApiError, AppState, AuthUser};

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/identify", post(identify))
        .route("/my-trees", get(my_trees))
        .route("/{id}", get(tree))
}

#[derive(Serialize)]
struct IdentifyResponse {
    success: bool,
    #[serde(flatten)]
    outcome: IdentificationOutcome,
}

async fn identify(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<IdentifyResponse>), ApiError> {
    let form = IdentifyForm::read(multipart, state.config().storage.max_upload_bytes).await?;

    let Some(image) = &form.image else {
        return Err(ApiError::bad_request("No image file provided"));
    };
    let (latitude, longitude) = form
        .coordinates()
        .ok_or_else(|| ApiError::bad_request("Location coordinates are required"))?;
    let location = GeoPoint::new(latitude, longitude)?;

    let stored = store_image(&state.upload_dir(), image).await?;
    let prediction = match state.classifier().classify(&stored.path).await {
        Ok(prediction) => prediction,
        Err(e) => {
            discard(&stored.path).await;
            return Err(e.into());
        }
    };

    let new = NewIdentification {
        user_id: user.id,
        image_url: stored.url,
        species: prediction.species,
        scientific_name: Some(prediction.scientific_name),
        confidence: Some(prediction.confidence),
        location,
        address: form.address,
        city: form.city,
        country: form.country,
        notes: form.notes,
    };
    let rules = *state.rules();
    let outcome = match state
        .with_storage(move |s| game::record_identification(s, &rules, &new, Utc::now()))
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            discard(&stored.path).await;
            return Err(e.into());
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(IdentifyResponse {
            success: true,
            outcome,
        }),
    ))
}

/// Remove an upload that never became an identification.
async fn discard(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

async fn my_trees(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let limit = state.config().game.my_trees_limit;
    let trees = state
        .with_storage(move |s| s.identifications_for_user(user.id, Some(limit)))
        .await?;
    Ok(Json(json!({ "trees": trees })))
}

async fn tree(
    State(state): State<AppState>,
    _: AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Ok(Path(id)) = id else {
        return Err(ApiError::not_found("Tree not found"));
    };
    let tree = state
        .with_storage(move |s| s.get_identification(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Tree not found"))?;
    Ok(Json(json!({ "tree": tree })))
}
