//! Purchase history endpoint

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::error::BillingResult;
use crate::summary::{purchase_summary, PurchaseSummary};
use crate::AppState;

/// GET /purchases/summary/:email
pub async fn get_purchase_summary(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> BillingResult<Json<PurchaseSummary>> {
    let summary = purchase_summary(&state.ledger, &state.licenses, &state.feedback, &email).await?;
    Ok(Json(summary))
}

pub fn purchase_routes() -> Router<AppState> {
    Router::new().route("/purchases/summary/:email", get(get_purchase_summary))
}
