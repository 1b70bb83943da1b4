//! HTTP API handlers

pub mod analytics;
pub mod entitlements;
pub mod feedback;
pub mod health;
pub mod licenses;
pub mod payments;
pub mod purchases;
pub mod webhooks;

pub use analytics::analytics_routes;
pub use entitlements::entitlement_routes;
pub use feedback::feedback_routes;
pub use health::health_routes;
pub use licenses::license_routes;
pub use payments::payment_routes;
pub use purchases::purchase_routes;
pub use webhooks::webhook_routes;

use crate::error::BillingError;
use axum::extract::rejection::JsonRejection;
use axum::Json;

/// Turn axum's JSON rejection into the service's error body
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, BillingError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| BillingError::Validation(rejection.body_text()))
}
