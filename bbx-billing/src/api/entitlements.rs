//! Entitlement endpoints

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::entitlements::{Plan, QuotaDecision, UserEntitlement};
use crate::error::BillingResult;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementResponse {
    #[serde(flatten)]
    pub entitlement: UserEntitlement,
    pub plan: Plan,
    pub quota: QuotaDecision,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub user_id: String,
    pub plan_id: String,
    pub songs_this_month: i64,
    /// None on unlimited plans
    pub remaining: Option<i64>,
}

/// GET /entitlements/:userId
pub async fn get_entitlement(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> BillingResult<Json<EntitlementResponse>> {
    let quota = state.entitlements.can_create_song(&user_id).await?;
    let entitlement = state.entitlements.get_entitlement(&user_id).await?;
    let plan = state.catalog.resolve(&entitlement.plan_id).clone();

    Ok(Json(EntitlementResponse {
        entitlement,
        plan,
        quota,
    }))
}

/// POST /entitlements/:userId/songs
///
/// Consumes one generation; 403 with the quota body when the limit is hit.
pub async fn consume_song(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> BillingResult<Json<UsageResponse>> {
    let entitlement = state.entitlements.increment_usage(&user_id).await?;
    let plan = state.catalog.resolve(&entitlement.plan_id);
    let remaining = (!plan.is_unlimited())
        .then(|| (plan.quota() - entitlement.songs_this_month).max(0));

    Ok(Json(UsageResponse {
        user_id: entitlement.user_id,
        plan_id: entitlement.plan_id,
        songs_this_month: entitlement.songs_this_month,
        remaining,
    }))
}

pub fn entitlement_routes() -> Router<AppState> {
    Router::new()
        .route("/entitlements/:user_id", get(get_entitlement))
        .route("/entitlements/:user_id/songs", post(consume_song))
}
