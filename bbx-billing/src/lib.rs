//! bbx-billing library - entitlement, billing and licensing service
//!
//! Components, leaves first:
//! - [`entitlements`]: plan catalog, per-user monthly quotas
//! - [`payments`]: webhook verification, typed events, handler registry
//! - [`ledger`]: idempotent purchase records
//! - [`licensing`]: license ids and rights documents
//! - [`feedback`]: heuristic lyric scoring
//! - [`analytics`]: beat popularity counters

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod analytics;
pub mod api;
pub mod config;
pub mod entitlements;
pub mod error;
pub mod feedback;
pub mod ledger;
pub mod licensing;
pub mod payments;
pub mod pricing;
pub mod storage;
pub mod summary;

pub use error::{BillingError, BillingResult};

use analytics::AnalyticsRecorder;
use entitlements::{EntitlementStore, PlanCatalog};
use feedback::FeedbackService;
use ledger::PurchaseLedger;
use licensing::LicenseIssuer;
use payments::{default_registry, PaymentEventProcessor, PaymentProvider, PurchaseFulfillment};

/// Resolved settings the service is wired from
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub catalog: PlanCatalog,
    pub licenses_dir: PathBuf,
    pub feedback_dir: PathBuf,
    pub webhook_secret: String,
    pub signature_tolerance_secs: i64,
}

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub catalog: Arc<PlanCatalog>,
    pub entitlements: Arc<EntitlementStore>,
    pub ledger: Arc<PurchaseLedger>,
    pub licenses: Arc<LicenseIssuer>,
    pub feedback: Arc<FeedbackService>,
    pub analytics: Arc<AnalyticsRecorder>,
    pub processor: Arc<PaymentEventProcessor>,
    pub provider: Arc<dyn PaymentProvider>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, settings: ServiceSettings, provider: Arc<dyn PaymentProvider>) -> Self {
        let catalog = Arc::new(settings.catalog);
        let entitlements = Arc::new(EntitlementStore::new(db.clone(), catalog.clone()));
        let ledger = Arc::new(PurchaseLedger::new(db.clone()));
        let licenses = Arc::new(LicenseIssuer::new(db.clone(), settings.licenses_dir));
        let feedback = Arc::new(FeedbackService::new(settings.feedback_dir));
        let analytics = Arc::new(AnalyticsRecorder::new(db.clone()));

        let fulfillment = Arc::new(PurchaseFulfillment::new(
            ledger.clone(),
            licenses.clone(),
            feedback.clone(),
        ));
        let processor = Arc::new(PaymentEventProcessor::new(
            db.clone(),
            settings.webhook_secret,
            settings.signature_tolerance_secs,
            default_registry(entitlements.clone(), fulfillment),
        ));

        Self {
            db,
            catalog,
            entitlements,
            ledger,
            licenses,
            feedback,
            analytics,
            processor,
            provider,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::webhook_routes())
        .merge(api::payment_routes())
        .merge(api::license_routes())
        .merge(api::feedback_routes())
        .merge(api::purchase_routes())
        .merge(api::entitlement_routes())
        .merge(api::analytics_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
