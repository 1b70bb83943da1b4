//! Purchase fulfillment: ledger row, then license, then feedback
//!
//! The ledger row is committed before the license is attempted. A license
//! failure is surfaced (so the provider retries) and leaves the purchase in
//! place; the retry finds the same row and completes the license.

use crate::error::BillingResult;
use crate::feedback::{FeedbackRequest, FeedbackService};
use crate::ledger::{PurchaseInput, PurchaseLedger, PurchaseRecord};
use crate::licensing::{License, LicenseIssuer};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct FulfilledPurchase {
    pub purchase: PurchaseRecord,
    pub license: License,
}

pub struct PurchaseFulfillment {
    ledger: Arc<PurchaseLedger>,
    issuer: Arc<LicenseIssuer>,
    feedback: Arc<FeedbackService>,
}

impl PurchaseFulfillment {
    pub fn new(
        ledger: Arc<PurchaseLedger>,
        issuer: Arc<LicenseIssuer>,
        feedback: Arc<FeedbackService>,
    ) -> Self {
        Self {
            ledger,
            issuer,
            feedback,
        }
    }

    pub async fn fulfill(
        &self,
        input: &PurchaseInput,
        lyrics: Option<&str>,
    ) -> BillingResult<FulfilledPurchase> {
        let purchase = self.ledger.create(input).await?;

        let license = match self.issuer.issue_license(&purchase).await {
            Ok(license) => license,
            Err(e) => {
                error!(
                    guid = %purchase.guid,
                    user_id = %purchase.user_id,
                    track_id = %purchase.track_id,
                    error = %e,
                    "Purchase recorded, license pending"
                );
                return Err(e);
            }
        };

        if let Some(lyrics) = lyrics {
            self.feedback_once(&purchase, lyrics).await;
        }

        info!(
            guid = %purchase.guid,
            license_id = %license.license_id,
            "Purchase fulfilled"
        );

        Ok(FulfilledPurchase { purchase, license })
    }

    /// Best effort; a redelivered event does not regenerate feedback
    async fn feedback_once(&self, purchase: &PurchaseRecord, lyrics: &str) {
        match self.feedback.load_feedback(&purchase.track_id).await {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => {
                warn!(track_id = %purchase.track_id, error = %e, "Feedback lookup failed");
                return;
            }
        }

        let request = FeedbackRequest {
            lyrics: lyrics.to_string(),
            title: Some(purchase.song_title.clone()),
            customer_email: purchase.customer_email.clone(),
        };
        if let Err(e) = self
            .feedback
            .generate_post_purchase_feedback(&purchase.track_id, &request)
            .await
        {
            warn!(track_id = %purchase.track_id, error = %e, "Post-purchase feedback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::Tier;
    use bbx_common::db::init_memory_database;
    use tempfile::TempDir;

    fn input() -> PurchaseInput {
        PurchaseInput {
            purchase_id: Some("cs_1".to_string()),
            user_id: "u1".to_string(),
            track_id: "s1".to_string(),
            song_title: "Song".to_string(),
            tier: Tier::Base,
            currency: "usd".to_string(),
            customer_email: None,
            paid_cents: Some(299),
        }
    }

    #[tokio::test]
    async fn test_fulfill_with_lyrics_writes_feedback_once() {
        let db = init_memory_database().await.unwrap();
        let dir = TempDir::new().unwrap();
        let feedback = Arc::new(FeedbackService::new(dir.path().join("feedback")));
        let fulfillment = PurchaseFulfillment::new(
            Arc::new(PurchaseLedger::new(db.clone())),
            Arc::new(LicenseIssuer::new(db, dir.path().join("licenses"))),
            feedback.clone(),
        );

        let first = fulfillment.fulfill(&input(), Some("first lyrics")).await.unwrap();
        let second = fulfillment.fulfill(&input(), Some("other lyrics")).await.unwrap();
        assert_eq!(first.license.license_id, second.license.license_id);

        let stored = feedback.load_feedback("s1").await.unwrap().unwrap();
        assert_eq!(stored.lyrics, "first lyrics");
    }

    #[tokio::test]
    async fn test_license_failure_keeps_purchase() {
        let db = init_memory_database().await.unwrap();
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("licenses");
        std::fs::write(&blocked, b"file").unwrap();

        let ledger = Arc::new(PurchaseLedger::new(db.clone()));
        let fulfillment = PurchaseFulfillment::new(
            ledger.clone(),
            Arc::new(LicenseIssuer::new(db, blocked)),
            Arc::new(FeedbackService::new(dir.path().join("feedback"))),
        );

        assert!(fulfillment.fulfill(&input(), None).await.is_err());
        assert!(ledger.find_by_user_track("u1", "s1").await.unwrap().is_some());
    }
}
