//! Beat popularity endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::json_body;
use crate::analytics::BeatPopularity;
use crate::error::{BillingError, BillingResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRequest {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub rating: u8,
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub limit: Option<i64>,
}

/// POST /beats/:beatId/play (body optional)
pub async fn track_play(
    State(state): State<AppState>,
    Path(beat_id): Path<String>,
    body: Option<Json<PlayRequest>>,
) -> BillingResult<Json<BeatPopularity>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let popularity = state
        .analytics
        .track_play(&beat_id, request.user_id.as_deref())
        .await?;
    Ok(Json(popularity))
}

/// POST /beats/:beatId/like
pub async fn track_like(
    State(state): State<AppState>,
    Path(beat_id): Path<String>,
) -> BillingResult<Json<BeatPopularity>> {
    Ok(Json(state.analytics.track_like(&beat_id).await?))
}

/// POST /beats/:beatId/rating
pub async fn rate_beat(
    State(state): State<AppState>,
    Path(beat_id): Path<String>,
    body: Result<Json<RatingRequest>, JsonRejection>,
) -> BillingResult<Json<BeatPopularity>> {
    let request = json_body(body)?;
    Ok(Json(state.analytics.rate_beat(&beat_id, request.rating).await?))
}

/// GET /beats/:beatId/popularity
pub async fn get_popularity(
    State(state): State<AppState>,
    Path(beat_id): Path<String>,
) -> BillingResult<Json<BeatPopularity>> {
    state
        .analytics
        .get_popularity(&beat_id)
        .await?
        .map(Json)
        .ok_or_else(|| BillingError::NotFound(format!("beat {}", beat_id)))
}

/// GET /beats/top?limit=
pub async fn get_top_beats(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> BillingResult<Json<Vec<BeatPopularity>>> {
    Ok(Json(state.analytics.get_top_performing(query.limit).await?))
}

pub fn analytics_routes() -> Router<AppState> {
    Router::new()
        .route("/beats/top", get(get_top_beats))
        .route("/beats/:beat_id/play", post(track_play))
        .route("/beats/:beat_id/like", post(track_like))
        .route("/beats/:beat_id/rating", post(rate_beat))
        .route("/beats/:beat_id/popularity", get(get_popularity))
}
