//! License issuance
//!
//! A license row is reserved first (unique per purchase guid), then the text
//! and PDF documents are written and their paths recorded. A row without
//! paths is a pending license; issuing again completes it under the same id.

pub mod id;
pub mod pdf;
pub mod template;

use crate::error::{BillingError, BillingResult};
use crate::ledger::PurchaseRecord;
use crate::pricing::Tier;
use crate::storage::write_atomic;
use bbx_common::time::{self, parse_db_timestamp, to_db_timestamp};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use id::{generate_license_id, is_well_formed};
use template::LicenseTerms;

/// Attempts at reserving a fresh license id before giving up
const MAX_ID_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub license_id: String,
    pub purchase_guid: Uuid,
    pub song_title: String,
    pub tier: Tier,
    pub issued_at: DateTime<Utc>,
    pub text_path: Option<PathBuf>,
    pub pdf_path: Option<PathBuf>,
}

impl License {
    /// Both documents recorded and present on disk
    pub async fn is_complete(&self) -> bool {
        let (Some(text), Some(pdf)) = (&self.text_path, &self.pdf_path) else {
            return false;
        };
        document_exists(text).await && document_exists(pdf).await
    }
}

async fn document_exists(path: &Path) -> bool {
    matches!(tokio::fs::try_exists(path).await, Ok(true))
}

fn license_from_row(row: &SqliteRow) -> BillingResult<License> {
    let guid: String = row.get("purchase_guid");
    let purchase_guid = Uuid::parse_str(&guid)
        .map_err(|e| BillingError::Validation(format!("corrupt purchase guid '{}': {}", guid, e)))?;
    let tier: String = row.get("tier");
    let issued_at: String = row.get("issued_at");
    let text_path: Option<String> = row.get("text_path");
    let pdf_path: Option<String> = row.get("pdf_path");

    Ok(License {
        license_id: row.get("license_id"),
        purchase_guid,
        song_title: row.get("song_title"),
        tier: tier.parse()?,
        issued_at: parse_db_timestamp(&issued_at)?,
        text_path: text_path.map(PathBuf::from),
        pdf_path: pdf_path.map(PathBuf::from),
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

pub struct LicenseIssuer {
    db: SqlitePool,
    documents_dir: PathBuf,
}

impl LicenseIssuer {
    pub fn new(db: SqlitePool, documents_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            documents_dir: documents_dir.into(),
        }
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    /// Issue (or complete) the license for a purchase
    pub async fn issue_license(&self, purchase: &PurchaseRecord) -> BillingResult<License> {
        self.issue_license_at(purchase, time::now()).await
    }

    pub async fn issue_license_at(
        &self,
        purchase: &PurchaseRecord,
        now: DateTime<Utc>,
    ) -> BillingResult<License> {
        if let Some(existing) = self.find_by_purchase(purchase.guid).await? {
            if existing.is_complete().await {
                debug!(license_id = %existing.license_id, "License already issued");
                return Ok(existing);
            }
            info!(license_id = %existing.license_id, "Completing pending license");
            return self.write_documents(existing, purchase).await;
        }

        let reserved = self.reserve(purchase, now).await?;
        self.write_documents(reserved, purchase).await
    }

    async fn reserve(&self, purchase: &PurchaseRecord, now: DateTime<Utc>) -> BillingResult<License> {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let license_id = generate_license_id(&mut rand::thread_rng(), &now);

            let result = sqlx::query(
                r#"
                INSERT INTO licenses (license_id, purchase_guid, song_title, tier, issued_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(purchase_guid) DO NOTHING
                "#,
            )
            .bind(&license_id)
            .bind(purchase.guid.to_string())
            .bind(&purchase.song_title)
            .bind(purchase.tier.as_str())
            .bind(to_db_timestamp(&now))
            .execute(&self.db)
            .await;

            match result {
                Ok(done) if done.rows_affected() == 1 => {
                    debug!(license_id = %license_id, attempt, "Reserved license id");
                    break;
                }
                Ok(_) => {
                    debug!(guid = %purchase.guid, "License reserved concurrently");
                    break;
                }
                Err(e) if is_unique_violation(&e) => {
                    warn!(license_id = %license_id, attempt, "License id collision, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.find_by_purchase(purchase.guid).await?.ok_or_else(|| {
            BillingError::ExternalService(format!(
                "could not reserve a license id for purchase {} after {} attempts",
                purchase.guid, MAX_ID_ATTEMPTS
            ))
        })
    }

    async fn write_documents(
        &self,
        mut license: License,
        purchase: &PurchaseRecord,
    ) -> BillingResult<License> {
        let licensee = purchase
            .customer_email
            .as_deref()
            .unwrap_or(purchase.user_id.as_str());
        let terms = LicenseTerms {
            license_id: &license.license_id,
            song_title: &license.song_title,
            tier: license.tier,
            licensee,
            issued_at: license.issued_at,
        };

        let lines = template::render_lines(&terms);
        let text = template::render_text(&terms);
        let pdf = pdf::render_pdf(&format!("License {}", license.license_id), &lines);

        let text_path = self.documents_dir.join(format!("{}.txt", license.license_id));
        let pdf_path = self.documents_dir.join(format!("{}.pdf", license.license_id));

        write_atomic(text_path.clone(), text.into_bytes()).await?;
        write_atomic(pdf_path.clone(), pdf).await?;

        sqlx::query("UPDATE licenses SET text_path = ?, pdf_path = ? WHERE license_id = ?")
            .bind(text_path.to_string_lossy().into_owned())
            .bind(pdf_path.to_string_lossy().into_owned())
            .bind(&license.license_id)
            .execute(&self.db)
            .await?;

        info!(
            license_id = %license.license_id,
            guid = %purchase.guid,
            tier = %license.tier,
            "License issued"
        );

        license.text_path = Some(text_path);
        license.pdf_path = Some(pdf_path);
        Ok(license)
    }

    pub async fn find_by_purchase(&self, purchase_guid: Uuid) -> BillingResult<Option<License>> {
        let row = sqlx::query(
            r#"
            SELECT license_id, purchase_guid, song_title, tier, issued_at, text_path, pdf_path
            FROM licenses
            WHERE purchase_guid = ?
            "#,
        )
        .bind(purchase_guid.to_string())
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(license_from_row).transpose()
    }

    pub async fn get_license(&self, license_id: &str) -> BillingResult<Option<License>> {
        let row = sqlx::query(
            r#"
            SELECT license_id, purchase_guid, song_title, tier, issued_at, text_path, pdf_path
            FROM licenses
            WHERE license_id = ?
            "#,
        )
        .bind(license_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(license_from_row).transpose()
    }

    /// Well-formed id that belongs to a recorded purchase
    pub async fn verify(&self, license_id: &str) -> BillingResult<bool> {
        if !is_well_formed(license_id) {
            return Ok(false);
        }

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM licenses l
                JOIN purchases p ON p.guid = l.purchase_guid
                WHERE l.license_id = ?
            )
            "#,
        )
        .bind(license_id)
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{PurchaseInput, PurchaseLedger};
    use bbx_common::db::init_memory_database;
    use tempfile::TempDir;

    async fn setup() -> (PurchaseLedger, LicenseIssuer, TempDir) {
        let db = init_memory_database().await.unwrap();
        let dir = TempDir::new().unwrap();
        let issuer = LicenseIssuer::new(db.clone(), dir.path().join("licenses"));
        (PurchaseLedger::new(db), issuer, dir)
    }

    async fn purchase(ledger: &PurchaseLedger, tier: Tier) -> PurchaseRecord {
        ledger
            .create(&PurchaseInput {
                purchase_id: Some("cs_1".to_string()),
                user_id: "u1".to_string(),
                track_id: "s1".to_string(),
                song_title: "My Song".to_string(),
                tier,
                currency: "usd".to_string(),
                customer_email: Some("fan@example.com".to_string()),
                paid_cents: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_issue_writes_both_documents() {
        let (ledger, issuer, _dir) = setup().await;
        let record = purchase(&ledger, Tier::Commercial).await;

        let license = issuer.issue_license(&record).await.unwrap();
        assert!(is_well_formed(&license.license_id));
        assert!(license.is_complete().await);

        let text = std::fs::read_to_string(license.text_path.as_ref().unwrap()).unwrap();
        assert!(text.contains(&license.license_id));
        assert!(text.contains("COMMERCIAL USE"));

        let pdf = std::fs::read(license.pdf_path.as_ref().unwrap()).unwrap();
        assert!(pdf.starts_with(b"%PDF-1.4"));
    }

    #[tokio::test]
    async fn test_issue_is_idempotent_per_purchase() {
        let (ledger, issuer, _dir) = setup().await;
        let record = purchase(&ledger, Tier::Base).await;

        let first = issuer.issue_license(&record).await.unwrap();
        let second = issuer.issue_license(&record).await.unwrap();
        assert_eq!(first.license_id, second.license_id);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM licenses")
            .fetch_one(&issuer.db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_pending_license_is_completed_with_same_id() {
        let (ledger, issuer, _dir) = setup().await;
        let record = purchase(&ledger, Tier::Premium).await;

        let issued = issuer.issue_license(&record).await.unwrap();
        std::fs::remove_file(issued.pdf_path.as_ref().unwrap()).unwrap();

        let completed = issuer.issue_license(&record).await.unwrap();
        assert_eq!(completed.license_id, issued.license_id);
        assert!(completed.is_complete().await);
    }

    #[tokio::test]
    async fn test_verify() {
        let (ledger, issuer, _dir) = setup().await;
        let record = purchase(&ledger, Tier::Base).await;
        let license = issuer.issue_license(&record).await.unwrap();

        assert!(issuer.verify(&license.license_id).await.unwrap());
        assert!(!issuer.verify("BBX-ZZZZ-1").await.unwrap());
        assert!(!issuer.verify("not-a-license").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_license() {
        let (ledger, issuer, _dir) = setup().await;
        let record = purchase(&ledger, Tier::Base).await;
        let license = issuer.issue_license(&record).await.unwrap();

        let loaded = issuer.get_license(&license.license_id).await.unwrap().unwrap();
        assert_eq!(loaded, license);
        assert!(issuer.get_license("BBX-0000-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_document_failure_leaves_pending_row() {
        let db = init_memory_database().await.unwrap();
        let dir = TempDir::new().unwrap();
        // A regular file where the documents directory should be
        let blocked = dir.path().join("licenses");
        std::fs::write(&blocked, b"not a directory").unwrap();

        let ledger = PurchaseLedger::new(db.clone());
        let issuer = LicenseIssuer::new(db, blocked);
        let record = purchase(&ledger, Tier::Base).await;

        assert!(issuer.issue_license(&record).await.is_err());

        let pending = issuer.find_by_purchase(record.guid).await.unwrap().unwrap();
        assert!(pending.text_path.is_none());
        assert!(!pending.is_complete().await);
    }
}
