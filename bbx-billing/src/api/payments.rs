//! Client payment endpoints

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use super::json_body;
use crate::error::BillingResult;
use crate::payments::checkout::{CheckoutRequest, PaymentRequest};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub id: String,
    pub client_secret: Option<String>,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionResponse {
    pub id: String,
    pub url: Option<String>,
    pub reference: String,
    pub amount: i64,
    pub currency: String,
}

/// POST /payments/intent
pub async fn create_payment_intent(
    State(state): State<AppState>,
    body: Result<Json<PaymentRequest>, JsonRejection>,
) -> BillingResult<Json<PaymentIntentResponse>> {
    let request = json_body(body)?;
    let intent = request.to_intent(&state.catalog)?;
    let handle = state.provider.create_payment_intent(&intent).await?;

    Ok(Json(PaymentIntentResponse {
        id: handle.id,
        client_secret: handle.client_secret,
        amount: intent.amount_cents,
        currency: intent.currency,
    }))
}

/// POST /payments/checkout
pub async fn create_checkout_session(
    State(state): State<AppState>,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> BillingResult<Json<CheckoutSessionResponse>> {
    let request = json_body(body)?;
    let session = request.to_session()?;
    let handle = state.provider.create_checkout_session(&session).await?;

    Ok(Json(CheckoutSessionResponse {
        id: handle.id,
        url: handle.url,
        reference: session.client_reference_id,
        amount: session.amount_cents,
        currency: session.currency,
    }))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/payments/intent", post(create_payment_intent))
        .route("/payments/checkout", post(create_checkout_session))
}
