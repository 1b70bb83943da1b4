//! Client payment requests
//!
//! Amounts are never trusted: every request is checked against the tier
//! price table or the plan catalog before a provider handle is created.

use super::events::parse_composite_reference;
use super::provider::{CheckoutSessionRequest, PaymentIntentRequest};
use crate::entitlements::PlanCatalog;
use crate::error::{BillingError, BillingResult};
use crate::pricing::{validate_currency, Tier, CURRENCY};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Provider limit on a single metadata value
const METADATA_VALUE_MAX: usize = 500;

fn default_currency() -> String {
    CURRENCY.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongPaymentRequest {
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub user_id: String,
    pub song_id: String,
    pub tier: String,
    #[serde(default)]
    pub song_title: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub lyrics: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPaymentRequest {
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub user_id: String,
    pub plan_type: String,
}

/// Body of `POST /payments/intent`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PaymentRequest {
    Song(SongPaymentRequest),
    Plan(PlanPaymentRequest),
}

/// Body of `POST /payments/checkout`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub user_id: String,
    pub song_id: String,
    pub tier: String,
    #[serde(default)]
    pub song_title: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub lyrics: Option<String>,
}

fn require_field(name: &str, value: &str) -> BillingResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BillingError::Validation(format!("{} is required", name)));
    }
    Ok(trimmed.to_string())
}

fn check_amount(amount: i64, expected: i64, what: &str) -> BillingResult<()> {
    if amount != expected {
        return Err(BillingError::Validation(format!(
            "amount {} does not match the {} price of {}",
            amount, what, expected
        )));
    }
    Ok(())
}

fn song_metadata(
    user_id: &str,
    song_id: &str,
    tier: Tier,
    song_title: Option<&str>,
    lyrics: Option<&str>,
) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("userId".to_string(), user_id.to_string());
    metadata.insert("songId".to_string(), song_id.to_string());
    metadata.insert("tier".to_string(), tier.as_str().to_string());
    if let Some(title) = song_title.map(str::trim).filter(|t| !t.is_empty()) {
        metadata.insert("songTitle".to_string(), title.to_string());
    }
    match lyrics.map(str::trim).filter(|l| !l.is_empty()) {
        Some(lyrics) if lyrics.len() <= METADATA_VALUE_MAX => {
            metadata.insert("lyrics".to_string(), lyrics.to_string());
        }
        Some(_) => debug!(song_id, "Lyrics exceed provider metadata limit, not attached"),
        None => {}
    }
    metadata
}

impl PaymentRequest {
    pub fn amount(&self) -> i64 {
        match self {
            PaymentRequest::Song(r) => r.amount,
            PaymentRequest::Plan(r) => r.amount,
        }
    }

    /// Validate against the price table and build the provider request
    pub fn to_intent(&self, catalog: &PlanCatalog) -> BillingResult<PaymentIntentRequest> {
        match self {
            PaymentRequest::Song(request) => {
                let user_id = require_field("userId", &request.user_id)?;
                let song_id = require_field("songId", &request.song_id)?;
                let tier: Tier = request.tier.parse()?;
                let currency = validate_currency(&request.currency)?;
                check_amount(request.amount, tier.price_cents(), tier.as_str())?;

                Ok(PaymentIntentRequest {
                    amount_cents: tier.price_cents(),
                    currency,
                    receipt_email: request.customer_email.clone(),
                    metadata: song_metadata(
                        &user_id,
                        &song_id,
                        tier,
                        request.song_title.as_deref(),
                        request.lyrics.as_deref(),
                    ),
                })
            }
            PaymentRequest::Plan(request) => {
                let user_id = require_field("userId", &request.user_id)?;
                let plan = catalog.require(request.plan_type.trim())?;
                if plan.price_cents <= 0 {
                    return Err(BillingError::Validation(format!(
                        "plan '{}' cannot be purchased",
                        plan.id
                    )));
                }
                let currency = validate_currency(&request.currency)?;
                check_amount(request.amount, plan.price_cents, &plan.id)?;

                let mut metadata = BTreeMap::new();
                metadata.insert("userId".to_string(), user_id);
                metadata.insert("planType".to_string(), plan.id.clone());

                Ok(PaymentIntentRequest {
                    amount_cents: plan.price_cents,
                    currency,
                    receipt_email: None,
                    metadata,
                })
            }
        }
    }
}

/// `songId_tier_title` with spaces in the title turned into underscores
pub fn composite_reference(song_id: &str, tier: Tier, song_title: &str) -> String {
    let title = song_title.split_whitespace().collect::<Vec<_>>().join("_");
    if title.is_empty() {
        format!("{}_{}", song_id, tier)
    } else {
        format!("{}_{}_{}", song_id, tier, title)
    }
}

impl CheckoutRequest {
    pub fn to_session(&self) -> BillingResult<CheckoutSessionRequest> {
        let user_id = require_field("userId", &self.user_id)?;
        let song_id = require_field("songId", &self.song_id)?;
        let tier: Tier = self.tier.parse()?;
        let title = self
            .song_title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("Untitled")
            .to_string();

        let reference = composite_reference(&song_id, tier, &title);
        // The reference must read back as the same song and tier
        let parsed = parse_composite_reference(&reference)?;
        if parsed.song_id != song_id || parsed.tier != tier {
            return Err(BillingError::Validation(format!(
                "songId '{}' cannot be encoded in a checkout reference",
                song_id
            )));
        }

        Ok(CheckoutSessionRequest {
            amount_cents: tier.price_cents(),
            currency: CURRENCY.to_string(),
            product_name: format!("{} ({})", title, tier.display_name()),
            client_reference_id: reference,
            customer_email: self.customer_email.clone(),
            metadata: song_metadata(&user_id, &song_id, tier, Some(&title), self.lyrics.as_deref()),
        })
    }
}
