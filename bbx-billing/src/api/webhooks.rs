//! Payment provider webhook endpoint
//!
//! The raw body is handed to the processor untouched; the signature covers
//! the exact bytes the provider sent.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::error::BillingResult;
use crate::AppState;

/// Header names accepted for the signature, in lookup order
pub const SIGNATURE_HEADERS: [&str; 2] = ["signature", "stripe-signature"];

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
}

fn signature_header(headers: &HeaderMap) -> Option<&str> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
}

/// POST /webhooks/payments
pub async fn receive_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> BillingResult<Json<WebhookResponse>> {
    let processed = state
        .processor
        .process(&body, signature_header(&headers))
        .await?;

    tracing::info!(
        event_id = %processed.event_id,
        event_type = %processed.event_type,
        outcome = ?processed.outcome,
        "Webhook processed"
    );

    Ok(Json(WebhookResponse { received: true }))
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhooks/payments", post(receive_payment_webhook))
}
