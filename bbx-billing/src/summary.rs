//! Per-customer purchase summary

use crate::error::{BillingError, BillingResult};
use crate::feedback::FeedbackService;
use crate::ledger::{PurchaseLedger, PurchaseRecord};
use crate::licensing::LicenseIssuer;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseHistoryEntry {
    #[serde(flatten)]
    pub purchase: PurchaseRecord,
    pub license_id: Option<String>,
    pub score: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseSummary {
    pub email: String,
    pub total_spent_cents: i64,
    pub purchase_count: usize,
    /// Mean feedback score over purchases that have feedback
    pub average_score: Option<f64>,
    /// Newest first
    pub purchases: Vec<PurchaseHistoryEntry>,
}

pub async fn purchase_summary(
    ledger: &PurchaseLedger,
    issuer: &LicenseIssuer,
    feedback: &FeedbackService,
    email: &str,
) -> BillingResult<PurchaseSummary> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(BillingError::Validation(format!("invalid email '{}'", email)));
    }

    let records = ledger.list_by_email(email).await?;
    let mut purchases = Vec::with_capacity(records.len());

    for purchase in records {
        let license_id = issuer
            .find_by_purchase(purchase.guid)
            .await?
            .map(|license| license.license_id);

        let score = match feedback.load_feedback(&purchase.track_id).await {
            Ok(artifact) => artifact.map(|f| f.score),
            Err(e) => {
                warn!(track_id = %purchase.track_id, error = %e, "Skipping unreadable feedback");
                None
            }
        };

        purchases.push(PurchaseHistoryEntry {
            purchase,
            license_id,
            score,
        });
    }

    let total_spent_cents = purchases.iter().map(|p| p.purchase.amount_cents).sum();
    let scores: Vec<f64> = purchases
        .iter()
        .filter_map(|p| p.score.map(f64::from))
        .collect();
    let average_score = if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    };

    Ok(PurchaseSummary {
        email: email.to_string(),
        total_spent_cents,
        purchase_count: purchases.len(),
        average_score,
        purchases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::FeedbackRequest;
    use crate::ledger::PurchaseInput;
    use crate::pricing::Tier;
    use bbx_common::db::init_memory_database;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_summary_totals_and_order() {
        let db = init_memory_database().await.unwrap();
        let dir = TempDir::new().unwrap();
        let ledger = PurchaseLedger::new(db.clone());
        let issuer = LicenseIssuer::new(db, dir.path().join("licenses"));
        let feedback = FeedbackService::new(dir.path().join("feedback"));

        let start = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        for (offset, track, tier) in [(0, "s1", Tier::Base), (1, "s2", Tier::Commercial)] {
            let record = ledger
                .create_at(
                    &PurchaseInput {
                        purchase_id: None,
                        user_id: "u1".to_string(),
                        track_id: track.to_string(),
                        song_title: track.to_string(),
                        tier,
                        currency: "usd".to_string(),
                        customer_email: Some("fan@example.com".to_string()),
                        paid_cents: None,
                    },
                    start + Duration::days(offset),
                )
                .await
                .unwrap();
            issuer.issue_license(&record).await.unwrap();
        }

        let artifact = feedback
            .generate_post_purchase_feedback(
                "s1",
                &FeedbackRequest {
                    lyrics: "just a line".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let summary = purchase_summary(&ledger, &issuer, &feedback, "fan@example.com")
            .await
            .unwrap();

        assert_eq!(summary.purchase_count, 2);
        assert_eq!(summary.total_spent_cents, 299 + 2999);
        assert_eq!(summary.purchases[0].purchase.track_id, "s2");
        assert!(summary.purchases.iter().all(|p| p.license_id.is_some()));
        assert_eq!(summary.average_score, Some(f64::from(artifact.score)));
    }

    #[tokio::test]
    async fn test_summary_for_unknown_email_is_empty() {
        let db = init_memory_database().await.unwrap();
        let dir = TempDir::new().unwrap();
        let summary = purchase_summary(
            &PurchaseLedger::new(db.clone()),
            &LicenseIssuer::new(db, dir.path()),
            &FeedbackService::new(dir.path()),
            "nobody@example.com",
        )
        .await
        .unwrap();

        assert_eq!(summary.purchase_count, 0);
        assert_eq!(summary.total_spent_cents, 0);
        assert!(summary.average_score.is_none());
    }

    #[tokio::test]
    async fn test_summary_rejects_invalid_email() {
        let db = init_memory_database().await.unwrap();
        let dir = TempDir::new().unwrap();
        let result = purchase_summary(
            &PurchaseLedger::new(db.clone()),
            &LicenseIssuer::new(db, dir.path()),
            &FeedbackService::new(dir.path()),
            "not-an-email",
        )
        .await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }
}
