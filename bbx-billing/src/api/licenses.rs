//! License verification endpoint

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::BillingResult;
use crate::pricing::Tier;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseVerification {
    pub license_id: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
}

/// GET /license/:id
///
/// Unknown ids are a 200 with `valid: false`, not a 404.
pub async fn verify_license(
    State(state): State<AppState>,
    Path(license_id): Path<String>,
) -> BillingResult<Json<LicenseVerification>> {
    let valid = state.licenses.verify(&license_id).await?;
    let license = if valid {
        state.licenses.get_license(&license_id).await?
    } else {
        None
    };

    Ok(Json(LicenseVerification {
        license_id,
        valid,
        song_title: license.as_ref().map(|l| l.song_title.clone()),
        tier: license.as_ref().map(|l| l.tier),
        issued_at: license.as_ref().map(|l| l.issued_at),
    }))
}

pub fn license_routes() -> Router<AppState> {
    Router::new().route("/license/:id", get(verify_license))
}
