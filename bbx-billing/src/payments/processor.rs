//! Webhook processing
//!
//! verify signature -> decode -> dispatch -> audit. Nothing is decoded or
//! written before the signature checks out. The audit row is bookkeeping
//! only: redeliveries are safe because handlers upsert on natural keys.

use super::events::PaymentEvent;
use crate::error::{BillingError, BillingResult};
use async_trait::async_trait;
use bbx_common::api::verify_signature_at;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one handler invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum HandlerOutcome {
    Ignored,
    #[serde(rename_all = "camelCase")]
    PlanUpdated { user_id: String, plan_id: String },
    #[serde(rename_all = "camelCase")]
    Purchased { purchase_guid: Uuid, license_id: String },
}

impl HandlerOutcome {
    fn audit_status(&self) -> &'static str {
        match self {
            HandlerOutcome::Ignored => "ignored",
            HandlerOutcome::PlanUpdated { .. } | HandlerOutcome::Purchased { .. } => "processed",
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &PaymentEvent) -> BillingResult<HandlerOutcome>;
}

/// Event type -> handler
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event_type: &str, handler: Arc<dyn EventHandler>) {
        if self
            .handlers
            .insert(event_type.to_string(), handler)
            .is_some()
        {
            warn!(event_type, "Replaced existing webhook handler");
        }
    }

    pub fn with(mut self, event_type: &str, handler: Arc<dyn EventHandler>) -> Self {
        self.register(event_type, handler);
        self
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Run the registered handler; unknown types are a logged no-op
    pub async fn dispatch(&self, event: &PaymentEvent) -> BillingResult<HandlerOutcome> {
        match self.handlers.get(&event.event_type) {
            Some(handler) => handler.handle(event).await,
            None => {
                info!(event_id = %event.id, event_type = %event.event_type, "Ignoring unhandled webhook event");
                Ok(HandlerOutcome::Ignored)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEvent {
    pub event_id: String,
    pub event_type: String,
    #[serde(flatten)]
    pub outcome: HandlerOutcome,
}

pub struct PaymentEventProcessor {
    db: SqlitePool,
    secret: String,
    tolerance_secs: i64,
    registry: HandlerRegistry,
}

impl PaymentEventProcessor {
    pub fn new(db: SqlitePool, secret: String, tolerance_secs: i64, registry: HandlerRegistry) -> Self {
        Self {
            db,
            secret,
            tolerance_secs,
            registry,
        }
    }

    pub async fn process(&self, payload: &[u8], signature: Option<&str>) -> BillingResult<ProcessedEvent> {
        self.process_at(payload, signature, chrono::Utc::now().timestamp())
            .await
    }

    pub async fn process_at(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: i64,
    ) -> BillingResult<ProcessedEvent> {
        let header = signature
            .ok_or_else(|| BillingError::Authorization("missing signature header".to_string()))?;
        verify_signature_at(payload, header, &self.secret, self.tolerance_secs, now)?;

        let event = PaymentEvent::decode(payload)?;
        debug!(event_id = %event.id, event_type = %event.event_type, "Webhook verified");

        match self.registry.dispatch(&event).await {
            Ok(outcome) => {
                self.audit(&event, outcome.audit_status(), None).await;
                Ok(ProcessedEvent {
                    event_id: event.id,
                    event_type: event.event_type,
                    outcome,
                })
            }
            Err(e) => {
                warn!(event_id = %event.id, event_type = %event.event_type, error = %e, "Webhook handler failed");
                self.audit(&event, "failed", Some(&e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn audit(&self, event: &PaymentEvent, status: &str, error: Option<&str>) {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (event_id, event_type, status, last_error)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(event_id) DO UPDATE SET
                deliveries = deliveries + 1,
                status = excluded.status,
                last_error = excluded.last_error,
                last_received_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(status)
        .bind(error)
        .execute(&self.db)
        .await;

        if let Err(e) = result {
            warn!(event_id = %event.id, error = %e, "Failed to record webhook audit row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbx_common::api::sign_payload;
    use bbx_common::db::init_memory_database;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_750_000_000;

    struct Counting(AtomicUsize);

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _event: &PaymentEvent) -> BillingResult<HandlerOutcome> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerOutcome::PlanUpdated {
                user_id: "u1".to_string(),
                plan_id: "pro".to_string(),
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: &PaymentEvent) -> BillingResult<HandlerOutcome> {
            Err(BillingError::ExternalService("disk full".to_string()))
        }
    }

    fn payload(event_type: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": event_type,
            "data": { "object": { "id": "sub_1", "metadata": { "userId": "u1" } } }
        }))
        .unwrap()
    }

    async fn processor(registry: HandlerRegistry) -> PaymentEventProcessor {
        PaymentEventProcessor::new(init_memory_database().await.unwrap(), SECRET.to_string(), 300, registry)
    }

    #[tokio::test]
    async fn test_valid_event_dispatches_and_audits() {
        let handler = Arc::new(Counting(AtomicUsize::new(0)));
        let processor = processor(
            HandlerRegistry::new().with("customer.subscription.updated", handler.clone()),
        )
        .await;
        let body = payload("customer.subscription.updated");
        let signature = sign_payload(SECRET, NOW, &body);

        for _ in 0..2 {
            let processed = processor.process_at(&body, Some(&signature), NOW).await.unwrap();
            assert_eq!(processed.event_id, "evt_1");
        }
        assert_eq!(handler.0.load(Ordering::SeqCst), 2);

        let (status, deliveries): (String, i64) =
            sqlx::query_as("SELECT status, deliveries FROM webhook_events WHERE event_id = 'evt_1'")
                .fetch_one(&processor.db)
                .await
                .unwrap();
        assert_eq!(status, "processed");
        assert_eq!(deliveries, 2);
    }

    #[tokio::test]
    async fn test_bad_signature_has_no_side_effects() {
        let handler = Arc::new(Counting(AtomicUsize::new(0)));
        let processor = processor(
            HandlerRegistry::new().with("customer.subscription.updated", handler.clone()),
        )
        .await;
        let body = payload("customer.subscription.updated");

        let wrong = sign_payload("other_secret", NOW, &body);
        assert!(matches!(
            processor.process_at(&body, Some(&wrong), NOW).await,
            Err(BillingError::Authorization(_))
        ));
        assert!(matches!(
            processor.process_at(&body, None, NOW).await,
            Err(BillingError::Authorization(_))
        ));

        let stale = sign_payload(SECRET, NOW - 3600, &body);
        assert!(processor.process_at(&body, Some(&stale), NOW).await.is_err());

        assert_eq!(handler.0.load(Ordering::SeqCst), 0);
        let audited: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM webhook_events")
            .fetch_one(&processor.db)
            .await
            .unwrap();
        assert_eq!(audited, 0);
    }

    #[tokio::test]
    async fn test_unregistered_type_is_ignored() {
        let processor = processor(HandlerRegistry::new()).await;
        let body = payload("invoice.created");
        let signature = sign_payload(SECRET, NOW, &body);

        let processed = processor.process_at(&body, Some(&signature), NOW).await.unwrap();
        assert_eq!(processed.outcome, HandlerOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_validation_error() {
        let processor = processor(HandlerRegistry::new()).await;
        let body = b"{not json".to_vec();
        let signature = sign_payload(SECRET, NOW, &body);

        assert!(matches!(
            processor.process_at(&body, Some(&signature), NOW).await,
            Err(BillingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_handler_failure_is_audited_and_surfaced() {
        let processor = processor(
            HandlerRegistry::new().with("customer.subscription.updated", Arc::new(Failing)),
        )
        .await;
        let body = payload("customer.subscription.updated");
        let signature = sign_payload(SECRET, NOW, &body);

        assert!(matches!(
            processor.process_at(&body, Some(&signature), NOW).await,
            Err(BillingError::ExternalService(_))
        ));

        let (status, error): (String, Option<String>) =
            sqlx::query_as("SELECT status, last_error FROM webhook_events WHERE event_id = 'evt_1'")
                .fetch_one(&processor.db)
                .await
                .unwrap();
        assert_eq!(status, "failed");
        assert!(error.unwrap().contains("disk full"));
    }
}
