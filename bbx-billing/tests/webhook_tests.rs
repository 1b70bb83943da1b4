//! End-to-end payment webhook flow: signature, purchase, license, feedback

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bbx_common::api::sign_payload;
use common::{empty_request, extract_json, setup_app, signed_webhook, TEST_SECRET};
use serde_json::{json, Value};
use tower::util::ServiceExt; // for `oneshot`

fn checkout_completed(event_id: &str, object: Value) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": object }
    })
}

async fn purchase_count(app: &common::TestApp) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM purchases")
        .fetch_one(&app.state.db)
        .await
        .unwrap()
}

async fn license_count(app: &common::TestApp) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM licenses")
        .fetch_one(&app.state.db)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_redelivered_checkout_creates_one_purchase_and_license() {
    let app = setup_app().await;
    let event = checkout_completed(
        "evt_checkout_1",
        json!({
            "id": "cs_test_1",
            "mode": "payment",
            "client_reference_id": "song123_base_My_Song",
            "customer_details": { "email": "fan@example.com" },
            "amount_total": 299,
            "currency": "usd"
        }),
    );

    for _ in 0..2 {
        let response = app.router.clone().oneshot(signed_webhook(&event)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(extract_json(response).await["received"], true);
    }

    assert_eq!(purchase_count(&app).await, 1);
    assert_eq!(license_count(&app).await, 1);

    let purchase = app
        .state
        .ledger
        .find_by_user_track("song123", "song123")
        .await
        .unwrap()
        .expect("purchase recorded");
    assert_eq!(purchase.song_title, "My Song");
    assert_eq!(purchase.amount_cents, 299);
    assert_eq!(purchase.customer_email.as_deref(), Some("fan@example.com"));

    let license = app
        .state
        .licenses
        .find_by_purchase(purchase.guid)
        .await
        .unwrap()
        .expect("license issued");
    assert!(license.is_complete().await);

    let text_path = license.text_path.as_ref().expect("text document recorded");
    let document = std::fs::read_to_string(text_path).unwrap();
    assert!(document.contains(&license.license_id));
    assert!(document.contains("PERSONAL USE"));
    assert!(!document.contains("COMMERCIAL USE"));
    assert_eq!(purchase.user_id, "song123");
    assert_eq!(purchase.tier.as_str(), "base");

    let response = app
        .router
        .clone()
        .oneshot(empty_request("GET", &format!("/license/{}", license.license_id)))
        .await
        .unwrap();
    let body = extract_json(response).await;
    assert_eq!(body["valid"], true);
    assert_eq!(body["songTitle"], "My Song");
    assert_eq!(body["tier"], "base");

    let deliveries: i64 =
        sqlx::query_scalar("SELECT deliveries FROM webhook_events WHERE event_id = ?")
            .bind("evt_checkout_1")
            .fetch_one(&app.state.db)
            .await
            .unwrap();
    assert_eq!(deliveries, 2);
}

#[tokio::test]
async fn test_purchase_with_lyrics_appears_in_summary() {
    let app = setup_app().await;
    let lyrics = "Verse:\nthe city sleeps tonight\nwe chase the fading light\n\
                  Chorus:\nhold on hold on\nuntil the dark is gone";
    let event = json!({
        "id": "evt_intent_1",
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": "pi_test_1",
            "amount": 999,
            "currency": "usd",
            "receipt_email": "Writer@Example.com",
            "metadata": {
                "userId": "writer-1",
                "songId": "night-drive",
                "tier": "premium",
                "songTitle": "Night Drive",
                "lyrics": lyrics
            }
        }}
    });

    let response = app.router.clone().oneshot(signed_webhook(&event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(empty_request("GET", "/ai-feedback/night-drive"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let feedback = extract_json(response).await;
    assert_eq!(feedback["title"], "Night Drive");

    let response = app
        .router
        .oneshot(empty_request("GET", "/purchases/summary/writer@example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary = extract_json(response).await;
    assert_eq!(summary["purchaseCount"], 1);
    assert_eq!(summary["totalSpentCents"], 999);
    assert_eq!(summary["purchases"][0]["tier"], "premium");
    assert!(summary["purchases"][0]["licenseId"].is_string());
    assert_eq!(summary["purchases"][0]["score"], feedback["score"]);
}

#[tokio::test]
async fn test_bad_signature_is_rejected_without_side_effects() {
    let app = setup_app().await;
    let body = serde_json::to_vec(&checkout_completed(
        "evt_forged",
        json!({ "id": "cs_forged", "client_reference_id": "song9_premium_Stolen" }),
    ))
    .unwrap();
    let signature = sign_payload("whsec_wrong", chrono::Utc::now().timestamp(), &body);

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header("signature", signature)
        .body(Body::from(body))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(purchase_count(&app).await, 0);
    assert_eq!(license_count(&app).await, 0);
}

#[tokio::test]
async fn test_missing_signature_is_rejected() {
    let app = setup_app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .body(Body::from("{}"))
        .unwrap();

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stale_signature_is_rejected() {
    let app = setup_app().await;
    let body = serde_json::to_vec(&json!({ "id": "evt_old", "type": "ping", "data": { "object": {} } }))
        .unwrap();
    let stale = chrono::Utc::now().timestamp() - 3600;

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header("stripe-signature", sign_payload(TEST_SECRET, stale, &body))
        .body(Body::from(body))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stripe_signature_header_and_unknown_event() {
    let app = setup_app().await;
    let body = serde_json::to_vec(&json!({
        "id": "evt_unknown",
        "type": "invoice.finalized",
        "data": { "object": { "id": "in_1" } }
    }))
    .unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header(
            "stripe-signature",
            sign_payload(TEST_SECRET, chrono::Utc::now().timestamp(), &body),
        )
        .body(Body::from(body))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status: String = sqlx::query_scalar("SELECT status FROM webhook_events WHERE event_id = ?")
        .bind("evt_unknown")
        .fetch_one(&app.state.db)
        .await
        .unwrap();
    assert_eq!(status, "ignored");
}

#[tokio::test]
async fn test_subscription_events_drive_plan() {
    let app = setup_app().await;
    let subscription = json!({
        "id": "sub_1",
        "status": "active",
        "metadata": { "userId": "member-1", "planType": "pro" }
    });

    let created = json!({
        "id": "evt_sub_created",
        "type": "customer.subscription.created",
        "data": { "object": subscription.clone() }
    });
    let response = app.router.clone().oneshot(signed_webhook(&created)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(empty_request("GET", "/entitlements/member-1"))
        .await
        .unwrap();
    assert_eq!(extract_json(response).await["planId"], "pro");

    let deleted = json!({
        "id": "evt_sub_deleted",
        "type": "customer.subscription.deleted",
        "data": { "object": subscription }
    });
    app.router.clone().oneshot(signed_webhook(&deleted)).await.unwrap();

    let response = app
        .router
        .oneshot(empty_request("GET", "/entitlements/member-1"))
        .await
        .unwrap();
    assert_eq!(extract_json(response).await["planId"], "free");
}

#[tokio::test]
async fn test_checkout_backed_payment_intent_is_acknowledged() {
    let app = setup_app().await;
    let event = json!({
        "id": "evt_pi_bare",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_bare", "amount": 299, "currency": "usd" } }
    });

    let response = app.router.clone().oneshot(signed_webhook(&event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(purchase_count(&app).await, 0);

    let status: String = sqlx::query_scalar("SELECT status FROM webhook_events WHERE event_id = ?")
        .bind("evt_pi_bare")
        .fetch_one(&app.state.db)
        .await
        .unwrap();
    assert_eq!(status, "ignored");
}

#[tokio::test]
async fn test_out_of_order_subscription_events() {
    let app = setup_app().await;
    let subscription = json!({
        "id": "sub_late",
        "status": "active",
        "metadata": { "userId": "member-2", "planType": "pro" }
    });
    let created_at = chrono::Utc::now().timestamp() - 600;

    for (id, event_type, created) in [
        ("evt_late_created", "customer.subscription.created", created_at),
        ("evt_late_deleted", "customer.subscription.deleted", created_at + 300),
        ("evt_late_updated", "customer.subscription.updated", created_at + 100),
    ] {
        let event = json!({
            "id": id,
            "type": event_type,
            "created": created,
            "data": { "object": subscription.clone() }
        });
        let response = app.router.clone().oneshot(signed_webhook(&event)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .router
        .oneshot(empty_request("GET", "/entitlements/member-2"))
        .await
        .unwrap();
    assert_eq!(extract_json(response).await["planId"], "free");
}
