//! Outbound payment provider calls
//!
//! The provider is an opaque collaborator: it creates payment intents and
//! checkout sessions and later reports the outcome through the webhook.

use crate::error::{BillingError, BillingResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";
const USER_AGENT: &str = concat!("bbx-billing/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where hosted checkout sends the customer afterwards
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRedirects {
    /// May contain the provider's `{CHECKOUT_SESSION_ID}` placeholder
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntentRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub receipt_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub product_name: String,
    /// `songId_tier_title` composite reference
    pub client_reference_id: String,
    pub customer_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// What the client needs to complete a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHandle {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> BillingResult<PaymentHandle>;

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<PaymentHandle>;
}

#[derive(Debug, Deserialize)]
struct StripeObject {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Stripe REST client (form-encoded requests, bearer auth)
pub struct StripeProvider {
    http_client: reqwest::Client,
    secret_key: String,
    api_base: String,
    redirects: CheckoutRedirects,
}

impl StripeProvider {
    pub fn new(secret_key: String, redirects: CheckoutRedirects) -> BillingResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| BillingError::ExternalService(e.to_string()))?;

        Ok(Self {
            http_client,
            secret_key,
            api_base: STRIPE_API_BASE.to_string(),
            redirects,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn post_form(&self, path: &str, params: &[(String, String)]) -> BillingResult<StripeObject> {
        let url = format!("{}{}", self.api_base.trim_end_matches('/'), path);

        tracing::debug!(path, "Calling payment provider");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(params)
            .send()
            .await
            .map_err(|e| BillingError::ExternalService(format!("payment provider unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::ExternalService(format!(
                "payment provider returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        response
            .json::<StripeObject>()
            .await
            .map_err(|e| BillingError::ExternalService(format!("unexpected provider response: {}", e)))
    }
}

fn metadata_params<'a>(
    prefix: &'a str,
    metadata: &'a BTreeMap<String, String>,
) -> impl Iterator<Item = (String, String)> + 'a {
    metadata
        .iter()
        .map(move |(k, v)| (format!("{}[{}]", prefix, k), v.clone()))
}

/// Form fields for `POST /v1/payment_intents`
pub fn payment_intent_params(request: &PaymentIntentRequest) -> Vec<(String, String)> {
    let mut params = vec![
        ("amount".to_string(), request.amount_cents.to_string()),
        ("currency".to_string(), request.currency.clone()),
        (
            "automatic_payment_methods[enabled]".to_string(),
            "true".to_string(),
        ),
    ];
    if let Some(email) = &request.receipt_email {
        params.push(("receipt_email".to_string(), email.clone()));
    }
    params.extend(metadata_params("metadata", &request.metadata));
    params
}

/// Form fields for `POST /v1/checkout/sessions`
///
/// The order metadata is copied onto the underlying payment intent so its
/// `payment_intent.succeeded` lands on the same ledger row as the session.
pub fn checkout_session_params(
    request: &CheckoutSessionRequest,
    redirects: &CheckoutRedirects,
) -> Vec<(String, String)> {
    let mut params = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), redirects.success_url.clone()),
        ("cancel_url".to_string(), redirects.cancel_url.clone()),
        (
            "client_reference_id".to_string(),
            request.client_reference_id.clone(),
        ),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        (
            "line_items[0][price_data][currency]".to_string(),
            request.currency.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            request.amount_cents.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            request.product_name.clone(),
        ),
    ];
    if let Some(email) = &request.customer_email {
        params.push(("customer_email".to_string(), email.clone()));
    }
    params.extend(metadata_params("metadata", &request.metadata));
    params.extend(metadata_params(
        "payment_intent_data[metadata]",
        &request.metadata,
    ));
    params
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> BillingResult<PaymentHandle> {
        let object = self
            .post_form("/v1/payment_intents", &payment_intent_params(request))
            .await?;

        tracing::info!(intent_id = %object.id, amount_cents = request.amount_cents, "Payment intent created");

        Ok(PaymentHandle {
            id: object.id,
            client_secret: object.client_secret,
            url: None,
        })
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<PaymentHandle> {
        let params = checkout_session_params(request, &self.redirects);
        let object = self.post_form("/v1/checkout/sessions", &params).await?;

        tracing::info!(
            session_id = %object.id,
            reference = %request.client_reference_id,
            "Checkout session created"
        );

        Ok(PaymentHandle {
            id: object.id,
            client_secret: None,
            url: object.url,
        })
    }
}

/// Local provider used when no provider key is configured
///
/// Hands out synthetic ids; payments complete only through signed webhooks.
#[derive(Debug, Default, Clone)]
pub struct OfflineProvider;

#[async_trait]
impl PaymentProvider for OfflineProvider {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> BillingResult<PaymentHandle> {
        let id = format!("pi_offline_{}", Uuid::new_v4().simple());
        tracing::debug!(intent_id = %id, amount_cents = request.amount_cents, "Offline payment intent");
        Ok(PaymentHandle {
            client_secret: Some(format!("{}_secret_offline", id)),
            id,
            url: None,
        })
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<PaymentHandle> {
        let id = format!("cs_offline_{}", Uuid::new_v4().simple());
        tracing::debug!(session_id = %id, reference = %request.client_reference_id, "Offline checkout session");
        Ok(PaymentHandle {
            id,
            client_secret: None,
            url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redirects() -> CheckoutRedirects {
        CheckoutRedirects {
            success_url: "https://shop.example/ok".to_string(),
            cancel_url: "https://shop.example/cancel".to_string(),
        }
    }

    fn lookup<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_payment_intent_params() {
        let mut metadata = BTreeMap::new();
        metadata.insert("userId".to_string(), "u1".to_string());
        metadata.insert("planType".to_string(), "creator".to_string());

        let params = payment_intent_params(&PaymentIntentRequest {
            amount_cents: 999,
            currency: "usd".to_string(),
            receipt_email: None,
            metadata,
        });

        assert_eq!(lookup(&params, "amount"), Some("999"));
        assert_eq!(lookup(&params, "currency"), Some("usd"));
        assert_eq!(lookup(&params, "metadata[userId]"), Some("u1"));
        assert_eq!(lookup(&params, "metadata[planType]"), Some("creator"));
        assert_eq!(lookup(&params, "receipt_email"), None);
    }

    #[test]
    fn test_checkout_session_params() {
        let mut metadata = BTreeMap::new();
        metadata.insert("userId".to_string(), "u1".to_string());
        metadata.insert("songId".to_string(), "song123".to_string());
        metadata.insert("tier".to_string(), "base".to_string());

        let params = checkout_session_params(
            &CheckoutSessionRequest {
                amount_cents: 299,
                currency: "usd".to_string(),
                product_name: "My Song (Base Download)".to_string(),
                client_reference_id: "song123_base_My_Song".to_string(),
                customer_email: Some("fan@example.com".to_string()),
                metadata,
            },
            &redirects(),
        );

        assert_eq!(lookup(&params, "mode"), Some("payment"));
        assert_eq!(lookup(&params, "client_reference_id"), Some("song123_base_My_Song"));
        assert_eq!(lookup(&params, "line_items[0][price_data][unit_amount]"), Some("299"));
        assert_eq!(lookup(&params, "customer_email"), Some("fan@example.com"));
        assert_eq!(lookup(&params, "success_url"), Some("https://shop.example/ok"));
        assert_eq!(lookup(&params, "cancel_url"), Some("https://shop.example/cancel"));
        assert_eq!(lookup(&params, "metadata[songId]"), Some("song123"));
        assert_eq!(
            lookup(&params, "payment_intent_data[metadata][songId]"),
            Some("song123")
        );
        assert_eq!(
            lookup(&params, "payment_intent_data[metadata][tier]"),
            Some("base")
        );
        assert_eq!(
            lookup(&params, "payment_intent_data[metadata][userId]"),
            Some("u1")
        );
    }

    #[tokio::test]
    async fn test_offline_provider_handles() {
        let provider = OfflineProvider;
        let intent = provider
            .create_payment_intent(&PaymentIntentRequest {
                amount_cents: 299,
                currency: "usd".to_string(),
                receipt_email: None,
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap();
        assert!(intent.id.starts_with("pi_offline_"));
        assert!(intent.client_secret.unwrap().ends_with("_secret_offline"));
    }

    #[tokio::test]
    async fn test_stripe_unreachable_is_external_service_error() {
        let provider = StripeProvider::new("sk_test_x".to_string(), redirects())
            .unwrap()
            .with_api_base("http://127.0.0.1:9");
        let result = provider
            .create_payment_intent(&PaymentIntentRequest {
                amount_cents: 299,
                currency: "usd".to_string(),
                receipt_email: None,
                metadata: BTreeMap::new(),
            })
            .await;
        assert!(matches!(result, Err(BillingError::ExternalService(_))));
    }
}
