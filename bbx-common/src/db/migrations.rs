//! Database schema migrations
//!
//! Tables are created with `CREATE TABLE IF NOT EXISTS`; anything that has
//! to change an existing database goes through a numbered migration here.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - databases in the field already ran them
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Keep them idempotent** - check before altering

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if no version has been recorded yet
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        warn!("This may indicate a downgrade. Proceeding with caution.");
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: lookup indexes for summary and trending queries
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_purchases_customer_email ON purchases(customer_email)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_beat_plays_beat_time ON beat_plays(beat_id, played_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_beat_popularity_plays ON beat_popularity(play_count DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
    )
    .bind(table)
    .bind(column)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Migration v2: plan change ordering, case-insensitive email index
///
/// `plan_changed_at` records the provider event time of the last applied
/// plan change so late deliveries of older events can be skipped.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    if !column_exists(pool, "user_entitlements", "plan_changed_at").await? {
        sqlx::query("ALTER TABLE user_entitlements ADD COLUMN plan_changed_at TEXT")
            .execute(pool)
            .await?;
        info!("Added user_entitlements.plan_changed_at");
    }

    // Email lookups compare with COLLATE NOCASE; the index must match
    sqlx::query("DROP INDEX IF EXISTS idx_purchases_customer_email")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_purchases_customer_email_nocase \
         ON purchases(customer_email COLLATE NOCASE)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;

    #[tokio::test]
    async fn test_fresh_database_is_at_current_version() {
        let pool = init_memory_database().await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_rerun_does_not_duplicate_versions() {
        let pool = init_memory_database().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, CURRENT_SCHEMA_VERSION as i64);
    }

    #[tokio::test]
    async fn test_lookup_indexes_exist() {
        let pool = init_memory_database().await.unwrap();
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_email_index_is_case_insensitive() {
        let pool = init_memory_database().await.unwrap();
        let sql: String = sqlx::query_scalar(
            "SELECT sql FROM sqlite_master WHERE name = 'idx_purchases_customer_email_nocase'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(sql.contains("COLLATE NOCASE"));
    }

    #[tokio::test]
    async fn test_v2_upgrades_v1_database() {
        use sqlx::sqlite::SqlitePoolOptions;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for statement in [
            "CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP)",
            "CREATE TABLE user_entitlements (user_id TEXT PRIMARY KEY, plan_id TEXT NOT NULL, songs_this_month INTEGER NOT NULL, last_usage_reset TEXT NOT NULL)",
            "CREATE TABLE purchases (guid TEXT PRIMARY KEY, customer_email TEXT)",
            "CREATE INDEX idx_purchases_customer_email ON purchases(customer_email)",
            "INSERT INTO schema_version (version) VALUES (1)",
        ] {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }

        run_migrations(&pool).await.unwrap();

        assert_eq!(get_schema_version(&pool).await.unwrap(), 2);
        assert!(column_exists(&pool, "user_entitlements", "plan_changed_at")
            .await
            .unwrap());
        let old_index: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'idx_purchases_customer_email'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(old_index, 0);
    }
}
