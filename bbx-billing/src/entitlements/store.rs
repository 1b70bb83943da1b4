//! Per-user entitlement storage
//!
//! # Monthly window
//! Every access first resets the counter when the stored `last_usage_reset`
//! falls in an earlier calendar month, then evaluates the quota.
//!
//! # Concurrency
//! `increment_usage` is one conditional `UPDATE ... RETURNING`: the quota
//! comparison and the increment happen in the same statement, so parallel
//! requests for one user can never push the counter past the quota.

use super::plans::{PlanCatalog, FREE_PLAN_ID};
use crate::error::{BillingError, BillingResult};
use bbx_common::time::{self, is_new_month, month_key, parse_db_timestamp, to_db_timestamp};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info};

/// Attempts at the conditional increment when the plan changes underneath it
const MAX_INCREMENT_ATTEMPTS: usize = 3;

/// Resolved usage state for one user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntitlement {
    pub user_id: String,
    pub plan_id: String,
    pub songs_this_month: i64,
    pub last_usage_reset: DateTime<Utc>,
}

impl UserEntitlement {
    /// Reset the counter in place when `now` is in a later calendar month
    pub fn reset_if_new_month(&mut self, now: DateTime<Utc>) -> bool {
        if is_new_month(&self.last_usage_reset, &now) {
            self.songs_this_month = 0;
            self.last_usage_reset = now;
            true
        } else {
            false
        }
    }
}

/// Outcome of a quota check
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub plan_id: String,
    pub used: i64,
    /// Monthly limit (-1 = unlimited)
    pub limit: i64,
}

/// Plan assignments and usage counters
pub struct EntitlementStore {
    db: SqlitePool,
    catalog: Arc<PlanCatalog>,
}

impl EntitlementStore {
    pub fn new(db: SqlitePool, catalog: Arc<PlanCatalog>) -> Self {
        Self { db, catalog }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Create the entitlement row on the free plan if the user has none
    async fn ensure_user(&self, user_id: &str, now: DateTime<Utc>) -> BillingResult<()> {
        validate_user_id(user_id)?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO user_entitlements (user_id, plan_id, songs_this_month, last_usage_reset)
            VALUES (?, ?, 0, ?)
            "#,
        )
        .bind(user_id)
        .bind(FREE_PLAN_ID)
        .bind(to_db_timestamp(&now))
        .execute(&self.db)
        .await?;

        if result.rows_affected() > 0 {
            info!(user_id, "Provisioned entitlement on free plan");
        }

        Ok(())
    }

    /// Persistently reset the counter when the last reset was in an earlier month
    ///
    /// Returns true when a reset happened.
    pub async fn reset_if_new_month(&self, user_id: &str) -> BillingResult<bool> {
        self.reset_if_new_month_at(user_id, time::now()).await
    }

    pub async fn reset_if_new_month_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<bool> {
        self.ensure_user(user_id, now).await?;

        let result = sqlx::query(
            r#"
            UPDATE user_entitlements
            SET songs_this_month = 0,
                last_usage_reset = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE user_id = ? AND strftime('%Y-%m', last_usage_reset) <> ?
            "#,
        )
        .bind(to_db_timestamp(&now))
        .bind(user_id)
        .bind(month_key(&now))
        .execute(&self.db)
        .await?;

        let reset = result.rows_affected() > 0;
        if reset {
            info!(user_id, month = %month_key(&now), "Monthly usage counter reset");
        }
        Ok(reset)
    }

    /// Current entitlement (provisioned and month-reset as needed)
    pub async fn get_entitlement(&self, user_id: &str) -> BillingResult<UserEntitlement> {
        self.get_entitlement_at(user_id, time::now()).await
    }

    pub async fn get_entitlement_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<UserEntitlement> {
        self.reset_if_new_month_at(user_id, now).await?;
        self.load(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("entitlement for user '{}'", user_id)))
    }

    async fn load(&self, user_id: &str) -> BillingResult<Option<UserEntitlement>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, plan_id, songs_this_month, last_usage_reset
            FROM user_entitlements
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                let reset: String = row.get("last_usage_reset");
                Ok(Some(UserEntitlement {
                    user_id: row.get("user_id"),
                    plan_id: row.get("plan_id"),
                    songs_this_month: row.get("songs_this_month"),
                    last_usage_reset: parse_db_timestamp(&reset)?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Whether the user may create another song right now (read-only apart from the reset)
    pub async fn can_create_song(&self, user_id: &str) -> BillingResult<QuotaDecision> {
        self.can_create_song_at(user_id, time::now()).await
    }

    pub async fn can_create_song_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<QuotaDecision> {
        let entitlement = self.get_entitlement_at(user_id, now).await?;
        let plan = self.catalog.resolve(&entitlement.plan_id);

        let allowed = plan.allows(entitlement.songs_this_month);
        let reason = (!allowed).then(|| {
            format!(
                "Monthly limit of {} songs reached on the '{}' plan",
                plan.quota(),
                plan.id
            )
        });

        Ok(QuotaDecision {
            allowed,
            reason,
            plan_id: entitlement.plan_id,
            used: entitlement.songs_this_month,
            limit: plan.quota(),
        })
    }

    /// Atomically consume one song from the user's monthly quota
    ///
    /// Fails with [`BillingError::QuotaExceeded`] without mutating anything
    /// when the quota is already used up.
    pub async fn increment_usage(&self, user_id: &str) -> BillingResult<UserEntitlement> {
        self.increment_usage_at(user_id, time::now()).await
    }

    pub async fn increment_usage_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<UserEntitlement> {
        for _ in 0..MAX_INCREMENT_ATTEMPTS {
            let current = self.get_entitlement_at(user_id, now).await?;
            let plan = self.catalog.resolve(&current.plan_id);

            // plan_id in the WHERE clause pins the quota we bound; a concurrent
            // plan change makes this match nothing and we go around again
            let updated: Option<i64> = sqlx::query_scalar(
                r#"
                UPDATE user_entitlements
                SET songs_this_month = songs_this_month + 1,
                    updated_at = CURRENT_TIMESTAMP
                WHERE user_id = ?
                  AND plan_id = ?
                  AND (? < 0 OR songs_this_month < ?)
                RETURNING songs_this_month
                "#,
            )
            .bind(user_id)
            .bind(&current.plan_id)
            .bind(plan.quota())
            .bind(plan.quota())
            .fetch_optional(&self.db)
            .await?;

            if let Some(songs_this_month) = updated {
                debug!(user_id, songs_this_month, plan = %current.plan_id, "Usage incremented");
                return Ok(UserEntitlement {
                    songs_this_month,
                    ..current
                });
            }

            let after = self.get_entitlement_at(user_id, now).await?;
            if after.plan_id == current.plan_id {
                return Err(BillingError::QuotaExceeded {
                    plan: after.plan_id,
                    limit: plan.quota(),
                    used: after.songs_this_month,
                });
            }
            debug!(user_id, "Plan changed during increment, retrying");
        }

        Err(BillingError::ExternalService(format!(
            "usage increment for '{}' did not settle after {} attempts",
            user_id, MAX_INCREMENT_ATTEMPTS
        )))
    }

    /// Assign a plan (idempotent; the usage counter is left untouched)
    pub async fn set_plan(&self, user_id: &str, plan_id: &str) -> BillingResult<UserEntitlement> {
        self.set_plan_at(user_id, plan_id, time::now()).await
    }

    pub async fn set_plan_at(
        &self,
        user_id: &str,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<UserEntitlement> {
        self.upsert_plan(user_id, plan_id, now, false).await?;
        self.get_entitlement_at(user_id, now).await
    }

    /// Apply a plan change carried by a provider event created at `changed_at`
    ///
    /// Returns `None` and leaves the row alone when a change from a later
    /// event has already been applied.
    pub async fn apply_plan_change(
        &self,
        user_id: &str,
        plan_id: &str,
        changed_at: DateTime<Utc>,
    ) -> BillingResult<Option<UserEntitlement>> {
        if !self.upsert_plan(user_id, plan_id, changed_at, true).await? {
            debug!(user_id, plan_id, changed_at = %changed_at, "Stale plan change skipped");
            return Ok(None);
        }
        self.get_entitlement_at(user_id, time::now()).await.map(Some)
    }

    async fn upsert_plan(
        &self,
        user_id: &str,
        plan_id: &str,
        changed_at: DateTime<Utc>,
        only_if_newer: bool,
    ) -> BillingResult<bool> {
        validate_user_id(user_id)?;
        let plan = self.catalog.require(plan_id)?;
        let changed_at = to_db_timestamp(&changed_at);

        let applied: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO user_entitlements
                (user_id, plan_id, songs_this_month, last_usage_reset, plan_changed_at)
            VALUES (?, ?, 0, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                plan_id = excluded.plan_id,
                plan_changed_at = excluded.plan_changed_at,
                updated_at = CURRENT_TIMESTAMP
            WHERE ? = 0
               OR user_entitlements.plan_changed_at IS NULL
               OR user_entitlements.plan_changed_at <= excluded.plan_changed_at
            RETURNING user_id
            "#,
        )
        .bind(user_id)
        .bind(&plan.id)
        .bind(&changed_at)
        .bind(&changed_at)
        .bind(only_if_newer)
        .fetch_optional(&self.db)
        .await?;

        if applied.is_some() {
            info!(user_id, plan_id = %plan.id, changed_at = %changed_at, "Plan assigned");
        }
        Ok(applied.is_some())
    }
}

fn validate_user_id(user_id: &str) -> BillingResult<()> {
    if user_id.trim().is_empty() {
        return Err(BillingError::Validation("userId cannot be empty".to_string()));
    }
    if user_id.len() > 256 {
        return Err(BillingError::Validation("userId is too long".to_string()));
    }
    Ok(())
}
