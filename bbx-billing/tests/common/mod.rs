//! Shared helpers for bbx-billing integration tests

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use bbx_billing::entitlements::PlanCatalog;
use bbx_billing::payments::OfflineProvider;
use bbx_billing::{build_router, AppState, ServiceSettings};
use bbx_common::api::sign_payload;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_SECRET: &str = "whsec_integration_test";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub dir: TempDir,
}

/// In-memory database, temp document root, offline provider
pub async fn setup_app() -> TestApp {
    let db = bbx_common::db::init_memory_database()
        .await
        .expect("Should create in-memory database");
    let dir = TempDir::new().expect("Should create temp dir");

    let settings = ServiceSettings {
        catalog: PlanCatalog::builtin(),
        licenses_dir: dir.path().join("licenses"),
        feedback_dir: dir.path().join("feedback"),
        webhook_secret: TEST_SECRET.to_string(),
        signature_tolerance_secs: 300,
    };
    let state = AppState::new(db, settings, Arc::new(OfflineProvider));

    TestApp {
        router: build_router(state.clone()),
        state,
        dir,
    }
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

/// Webhook request signed with the test secret at the current time
pub fn signed_webhook(payload: &Value) -> Request<Body> {
    let body = serde_json::to_vec(payload).unwrap();
    let signature = sign_payload(TEST_SECRET, chrono::Utc::now().timestamp(), &body);
    Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header("content-type", "application/json")
        .header("signature", signature)
        .body(Body::from(body))
        .unwrap()
}

pub async fn extract_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}
