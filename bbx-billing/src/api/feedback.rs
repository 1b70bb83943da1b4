//! Lyric feedback endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::get,
    Json, Router,
};

use super::json_body;
use crate::error::{BillingError, BillingResult};
use crate::feedback::{FeedbackRequest, LyricFeedback};
use crate::AppState;

/// POST /ai-feedback/:songId
pub async fn generate_feedback(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
    body: Result<Json<FeedbackRequest>, JsonRejection>,
) -> BillingResult<Json<LyricFeedback>> {
    let request = json_body(body)?;
    let feedback = state
        .feedback
        .generate_post_purchase_feedback(&song_id, &request)
        .await?;
    Ok(Json(feedback))
}

/// GET /ai-feedback/:songId
pub async fn get_feedback(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
) -> BillingResult<Json<LyricFeedback>> {
    state
        .feedback
        .load_feedback(&song_id)
        .await?
        .map(Json)
        .ok_or_else(|| BillingError::NotFound(format!("feedback for song {}", song_id)))
}

pub fn feedback_routes() -> Router<AppState> {
    Router::new().route("/ai-feedback/:song_id", get(get_feedback).post(generate_feedback))
}
