//! Purchase ledger
//!
//! One row per (user_id, track_id). Webhook redeliveries and the second of
//! a checkout/payment-intent pair land on the same row: the upsert keeps the
//! original guid and only fills in fields the first delivery lacked.

use crate::error::{BillingError, BillingResult};
use crate::pricing::Tier;
use bbx_common::time::{self, parse_db_timestamp, to_db_timestamp};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const STATUS_COMPLETED: &str = "completed";

/// Purchase fields extracted from a payment event
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseInput {
    /// Provider checkout session or payment intent id
    pub purchase_id: Option<String>,
    pub user_id: String,
    pub track_id: String,
    pub song_title: String,
    pub tier: Tier,
    pub currency: String,
    pub customer_email: Option<String>,
    /// Amount the provider reports as charged, if any
    pub paid_cents: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub guid: Uuid,
    pub purchase_id: Option<String>,
    pub user_id: String,
    pub track_id: String,
    pub song_title: String,
    pub tier: Tier,
    pub amount_cents: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT guid, purchase_id, user_id, track_id, song_title, tier, amount_cents,
           currency, customer_email, status, created_at
    FROM purchases
"#;

fn record_from_row(row: &SqliteRow) -> BillingResult<PurchaseRecord> {
    let guid: String = row.get("guid");
    let guid = Uuid::parse_str(&guid)
        .map_err(|e| BillingError::Validation(format!("corrupt purchase guid '{}': {}", guid, e)))?;
    let tier: String = row.get("tier");
    let created_at: String = row.get("created_at");

    Ok(PurchaseRecord {
        guid,
        purchase_id: row.get("purchase_id"),
        user_id: row.get("user_id"),
        track_id: row.get("track_id"),
        song_title: row.get("song_title"),
        tier: tier.parse()?,
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        customer_email: row.get("customer_email"),
        status: row.get("status"),
        created_at: parse_db_timestamp(&created_at)?,
    })
}

fn validate_input(input: &PurchaseInput) -> BillingResult<()> {
    if input.user_id.trim().is_empty() {
        return Err(BillingError::Validation("purchase without user id".to_string()));
    }
    if input.track_id.trim().is_empty() {
        return Err(BillingError::Validation("purchase without track id".to_string()));
    }
    Ok(())
}

pub struct PurchaseLedger {
    db: SqlitePool,
}

impl PurchaseLedger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record a completed purchase (idempotent on user and track)
    pub async fn create(&self, input: &PurchaseInput) -> BillingResult<PurchaseRecord> {
        self.create_at(input, time::now()).await
    }

    pub async fn create_at(
        &self,
        input: &PurchaseInput,
        now: DateTime<Utc>,
    ) -> BillingResult<PurchaseRecord> {
        validate_input(input)?;

        let amount_cents = input.tier.price_cents();
        if let Some(paid) = input.paid_cents {
            if paid != amount_cents {
                warn!(
                    user_id = %input.user_id,
                    track_id = %input.track_id,
                    tier = %input.tier,
                    paid_cents = paid,
                    table_cents = amount_cents,
                    "Provider amount differs from price table, recording table price"
                );
            }
        }

        let candidate_guid = Uuid::new_v4();

        let row = sqlx::query(
            r#"
            INSERT INTO purchases (
                guid, purchase_id, user_id, track_id, song_title, tier,
                amount_cents, currency, customer_email, status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, track_id) DO UPDATE SET
                purchase_id = COALESCE(purchases.purchase_id, excluded.purchase_id),
                customer_email = COALESCE(purchases.customer_email, excluded.customer_email),
                song_title = CASE WHEN purchases.song_title = '' THEN excluded.song_title
                                  ELSE purchases.song_title END,
                updated_at = CURRENT_TIMESTAMP
            RETURNING guid, purchase_id, user_id, track_id, song_title, tier, amount_cents,
                      currency, customer_email, status, created_at
            "#,
        )
        .bind(candidate_guid.to_string())
        .bind(&input.purchase_id)
        .bind(&input.user_id)
        .bind(&input.track_id)
        .bind(&input.song_title)
        .bind(input.tier.as_str())
        .bind(amount_cents)
        .bind(&input.currency)
        .bind(&input.customer_email)
        .bind(STATUS_COMPLETED)
        .bind(to_db_timestamp(&now))
        .fetch_one(&self.db)
        .await?;

        let record = record_from_row(&row)?;

        if record.guid == candidate_guid {
            info!(
                guid = %record.guid,
                user_id = %record.user_id,
                track_id = %record.track_id,
                tier = %record.tier,
                amount_cents = record.amount_cents,
                "Purchase recorded"
            );
        } else {
            debug!(
                guid = %record.guid,
                purchase_id = ?record.purchase_id,
                "Purchase already recorded, merged redelivery"
            );
        }

        Ok(record)
    }

    pub async fn find_by_user_track(
        &self,
        user_id: &str,
        track_id: &str,
    ) -> BillingResult<Option<PurchaseRecord>> {
        let sql = format!("{} WHERE user_id = ? AND track_id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(track_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// All purchases for a customer email, newest first
    pub async fn list_by_email(&self, email: &str) -> BillingResult<Vec<PurchaseRecord>> {
        let sql = format!(
            "{} WHERE customer_email = ? COLLATE NOCASE ORDER BY created_at DESC, guid",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(email.trim())
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(record_from_row).collect()
    }
}
