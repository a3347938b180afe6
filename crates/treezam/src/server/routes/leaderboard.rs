use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::leaderboard::{self, Metric, MyRank};
use crate::model::GeoPoint;
use crate::server::{ApiError, AppState, AuthUser};

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/global", get(global))
        .route("/location", get(location))
        .route("/my-rank", get(my_rank))
}

#[derive(Debug, Deserialize)]
struct MetricQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl MetricQuery {
    fn metric(&self) -> Metric {
        Metric::parse_lenient(self.kind.as_deref())
    }
}

// Raw text; the handler parses it and reports its own error.
#[derive(Debug, Deserialize)]
struct AreaQuery {
    latitude: Option<String>,
    longitude: Option<String>,
    radius: Option<String>,
}

fn parse_number(value: Option<&str>) -> Option<f64> {
    value?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

async fn global(
    State(state): State<AppState>,
    _: AuthUser,
    Query(query): Query<MetricQuery>,
) -> Result<Json<Value>, ApiError> {
    let metric = query.metric();
    let limit = state.config().game.global_leaderboard_limit;
    let board = state
        .with_storage(move |s| leaderboard::global(s, metric, limit))
        .await?;
    Ok(Json(json!({ "leaderboard": board })))
}

async fn location(
    State(state): State<AppState>,
    _: AuthUser,
    Query(query): Query<AreaQuery>,
) -> Result<Json<Value>, ApiError> {
    let (Some(latitude), Some(longitude)) = (
        parse_number(query.latitude.as_deref()),
        parse_number(query.longitude.as_deref()),
    ) else {
        return Err(ApiError::bad_request("Location coordinates required"));
    };
    let center = GeoPoint::new(latitude, longitude)?;

    let game = &state.config().game;
    let radius = parse_number(query.radius.as_deref())
        .filter(|r| *r > 0.0)
        .unwrap_or(game.default_challenge_radius_m);
    let limit = game.location_leaderboard_limit;

    let board = state
        .with_storage(move |s| leaderboard::around(s, center, radius, limit))
        .await?;
    Ok(Json(json!({ "leaderboard": board })))
}

async fn my_rank(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    Query(query): Query<MetricQuery>,
) -> Result<Json<MyRank>, ApiError> {
    let metric = query.metric();
    let rank = state
        .with_storage(move |s| leaderboard::rank_of(s, &user, metric))
        .await?;
    Ok(Json(rank))
}
