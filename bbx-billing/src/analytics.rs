//! Beat popularity counters
//!
//! Counters are cumulative. Each play is also logged with its timestamp so
//! the trending flag reflects the last seven days rather than lifetime
//! totals.

use crate::error::{BillingError, BillingResult};
use bbx_common::time::{self, to_db_timestamp};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

pub const TRENDING_WINDOW_DAYS: i64 = 7;
pub const TRENDING_MIN_RECENT_PLAYS: i64 = 3;
pub const TRENDING_MIN_RECENT_SHARE: f64 = 0.5;

pub const DEFAULT_TOP_LIMIT: i64 = 10;
pub const MAX_TOP_LIMIT: i64 = 100;

const MAX_BEAT_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatPopularity {
    pub beat_id: String,
    pub play_count: i64,
    pub like_count: i64,
    /// Average of 1-5 ratings (0.0 when unrated)
    pub rating: f64,
    pub rating_count: i64,
    pub recent_plays: i64,
    pub trending: bool,
}

/// At least three plays in the window, making up at least half of all plays
pub fn is_trending(recent_plays: i64, total_plays: i64) -> bool {
    if total_plays <= 0 {
        return false;
    }
    recent_plays >= TRENDING_MIN_RECENT_PLAYS
        && recent_plays as f64 / total_plays as f64 >= TRENDING_MIN_RECENT_SHARE
}

pub fn clamp_top_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_TOP_LIMIT).clamp(1, MAX_TOP_LIMIT)
}

fn validate_beat_id(beat_id: &str) -> BillingResult<()> {
    if beat_id.trim().is_empty() || beat_id.len() > MAX_BEAT_ID_LEN {
        return Err(BillingError::Validation(format!(
            "beat id must be 1-{} characters",
            MAX_BEAT_ID_LEN
        )));
    }
    Ok(())
}

fn window_start(now: DateTime<Utc>) -> String {
    to_db_timestamp(&(now - Duration::days(TRENDING_WINDOW_DAYS)))
}

fn popularity_from_row(row: &SqliteRow) -> BeatPopularity {
    let play_count: i64 = row.get("play_count");
    let recent_plays: i64 = row.get("recent_plays");
    BeatPopularity {
        beat_id: row.get("beat_id"),
        play_count,
        like_count: row.get("like_count"),
        rating: row.get("rating"),
        rating_count: row.get("rating_count"),
        recent_plays,
        trending: is_trending(recent_plays, play_count),
    }
}

const POPULARITY_SELECT: &str = r#"
    SELECT bp.beat_id, bp.play_count, bp.like_count, bp.rating, bp.rating_count,
           (SELECT COUNT(*) FROM beat_plays p
            WHERE p.beat_id = bp.beat_id AND p.played_at >= ?) AS recent_plays
    FROM beat_popularity bp
"#;

pub struct AnalyticsRecorder {
    db: SqlitePool,
}

impl AnalyticsRecorder {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn track_play(
        &self,
        beat_id: &str,
        user_id: Option<&str>,
    ) -> BillingResult<BeatPopularity> {
        self.track_play_at(beat_id, user_id, time::now()).await
    }

    pub async fn track_play_at(
        &self,
        beat_id: &str,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> BillingResult<BeatPopularity> {
        validate_beat_id(beat_id)?;

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO beat_popularity (beat_id, play_count)
            VALUES (?, 1)
            ON CONFLICT(beat_id) DO UPDATE SET
                play_count = play_count + 1,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(beat_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO beat_plays (beat_id, user_id, played_at) VALUES (?, ?, ?)")
            .bind(beat_id)
            .bind(user_id)
            .bind(to_db_timestamp(&now))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(beat_id, user_id = ?user_id, "Play tracked");

        self.require_popularity(beat_id, now).await
    }

    pub async fn track_like(&self, beat_id: &str) -> BillingResult<BeatPopularity> {
        validate_beat_id(beat_id)?;

        sqlx::query(
            r#"
            INSERT INTO beat_popularity (beat_id, like_count)
            VALUES (?, 1)
            ON CONFLICT(beat_id) DO UPDATE SET
                like_count = like_count + 1,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(beat_id)
        .execute(&self.db)
        .await?;

        debug!(beat_id, "Like tracked");
        self.require_popularity(beat_id, time::now()).await
    }

    /// Fold a 1-5 rating into the running average
    pub async fn rate_beat(&self, beat_id: &str, rating: u8) -> BillingResult<BeatPopularity> {
        validate_beat_id(beat_id)?;
        if !(1..=5).contains(&rating) {
            return Err(BillingError::Validation(format!(
                "rating must be between 1 and 5, got {}",
                rating
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO beat_popularity (beat_id, rating, rating_count)
            VALUES (?, ?, 1)
            ON CONFLICT(beat_id) DO UPDATE SET
                rating = (rating * rating_count + excluded.rating) / (rating_count + 1),
                rating_count = rating_count + 1,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(beat_id)
        .bind(f64::from(rating))
        .execute(&self.db)
        .await?;

        debug!(beat_id, rating, "Rating recorded");
        self.require_popularity(beat_id, time::now()).await
    }

    pub async fn get_popularity(&self, beat_id: &str) -> BillingResult<Option<BeatPopularity>> {
        self.get_popularity_at(beat_id, time::now()).await
    }

    pub async fn get_popularity_at(
        &self,
        beat_id: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<Option<BeatPopularity>> {
        let sql = format!("{} WHERE bp.beat_id = ?", POPULARITY_SELECT);
        let row = sqlx::query(&sql)
            .bind(window_start(now))
            .bind(beat_id)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.as_ref().map(popularity_from_row))
    }

    async fn require_popularity(
        &self,
        beat_id: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<BeatPopularity> {
        self.get_popularity_at(beat_id, now)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("beat {}", beat_id)))
    }

    /// Most played beats, limit clamped to 1..=100
    pub async fn get_top_performing(&self, limit: Option<i64>) -> BillingResult<Vec<BeatPopularity>> {
        self.get_top_performing_at(limit, time::now()).await
    }

    pub async fn get_top_performing_at(
        &self,
        limit: Option<i64>,
        now: DateTime<Utc>,
    ) -> BillingResult<Vec<BeatPopularity>> {
        let sql = format!(
            "{} ORDER BY bp.play_count DESC, bp.like_count DESC, bp.beat_id LIMIT ?",
            POPULARITY_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(window_start(now))
            .bind(clamp_top_limit(limit))
            .fetch_all(&self.db)
            .await?;

        Ok(rows.iter().map(popularity_from_row).collect())
    }

    /// Drop play log rows older than the trending window
    ///
    /// Lifetime counts live in `beat_popularity`, so only the recent
    /// window of `beat_plays` is ever read.
    pub async fn prune_play_log(&self) -> BillingResult<u64> {
        self.prune_play_log_at(time::now()).await
    }

    pub async fn prune_play_log_at(&self, now: DateTime<Utc>) -> BillingResult<u64> {
        let result = sqlx::query("DELETE FROM beat_plays WHERE played_at < ?")
            .bind(window_start(now))
            .execute(&self.db)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!(removed, "Pruned play log");
        }
        Ok(removed)
    }
}
