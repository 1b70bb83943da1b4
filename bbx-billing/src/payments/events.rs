//! Webhook event decoding
//!
//! Payloads are decoded once, at the boundary, into [`PaymentEvent`]. Known
//! event types get strongly typed objects; anything else becomes
//! [`PaymentEventKind::Unrecognized`] and is ignored downstream.

use crate::error::{BillingError, BillingResult};
use crate::ledger::PurchaseInput;
use crate::pricing::{validate_currency, Tier, CURRENCY};
use bbx_common::time;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const SUBSCRIPTION_CREATED: &str = "customer.subscription.created";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

/// Title recorded when neither metadata nor reference carries one
const UNTITLED: &str = "Untitled";

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    /// Unix seconds when the provider created the event
    #[serde(default)]
    created: Option<i64>,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: Value,
}

/// Verified, decoded webhook event
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    /// Provider event id (audit key)
    pub id: String,
    /// Raw provider event type, used as the registry key
    pub event_type: String,
    /// Provider creation time; orders plan changes delivered out of order
    pub created: Option<DateTime<Utc>>,
    pub kind: PaymentEventKind,
}

/// Typed event payloads
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEventKind {
    CheckoutCompleted(CheckoutSession),
    PaymentSucceeded(PaymentIntent),
    SubscriptionChanged(Subscription),
    SubscriptionCanceled(Subscription),
    Unrecognized,
}

/// Order fields the frontend attaches as provider metadata
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct OrderMetadata {
    #[serde(rename = "userId", alias = "user_id")]
    pub user_id: Option<String>,
    #[serde(rename = "songId", alias = "song_id")]
    pub song_id: Option<String>,
    pub tier: Option<String>,
    #[serde(rename = "songTitle", alias = "song_title")]
    pub song_title: Option<String>,
    #[serde(rename = "planType", alias = "plan_type")]
    pub plan_type: Option<String>,
    /// Lyrics for post-purchase feedback, when the client supplied them
    pub lyrics: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: OrderMetadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub receipt_email: Option<String>,
    #[serde(default)]
    pub metadata: OrderMetadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: OrderMetadata,
}

/// What a payment event asks the system to do
#[derive(Debug, Clone, PartialEq)]
pub enum Order {
    Purchase {
        input: PurchaseInput,
        lyrics: Option<String>,
    },
    PlanChange {
        user_id: String,
        plan_id: String,
    },
}

/// Parts of a `songId_tier_title` reference
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeReference {
    pub song_id: String,
    pub tier: Tier,
    pub title: String,
}

/// Split a `songId_tier_title` reference
///
/// The first segment (after the first) that names a tier is the separator,
/// so song ids may themselves contain underscores. Title underscores become
/// spaces.
pub fn parse_composite_reference(reference: &str) -> BillingResult<CompositeReference> {
    let segments: Vec<&str> = reference.trim().split('_').collect();

    let tier_index = segments
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, segment)| segment.parse::<Tier>().is_ok())
        .map(|(index, _)| index)
        .ok_or_else(|| {
            BillingError::Validation(format!("reference '{}' does not name a tier", reference))
        })?;

    let song_id = segments[..tier_index].join("_");
    if song_id.is_empty() {
        return Err(BillingError::Validation(format!(
            "reference '{}' has no song id",
            reference
        )));
    }

    let tier = segments[tier_index].parse::<Tier>()?;
    let title = segments[tier_index + 1..]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    Ok(CompositeReference {
        song_id,
        tier,
        title: if title.is_empty() { UNTITLED.to_string() } else { title },
    })
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn purchase_order(
    metadata: &OrderMetadata,
    reference: Option<&str>,
    purchase_id: &str,
    customer_email: Option<String>,
    currency: Option<&str>,
    paid_cents: Option<i64>,
) -> BillingResult<Order> {
    let currency = match currency {
        Some(c) => validate_currency(c)?,
        None => CURRENCY.to_string(),
    };

    let (track_id, tier, title) = match (non_empty(&metadata.song_id), non_empty(&metadata.tier)) {
        (Some(song_id), Some(tier)) => (song_id, tier.parse::<Tier>()?, None),
        _ => {
            let reference = reference.map(str::trim).filter(|r| !r.is_empty()).ok_or_else(|| {
                BillingError::Validation(
                    "purchase event has neither songId/tier metadata nor a client reference"
                        .to_string(),
                )
            })?;
            let parsed = parse_composite_reference(reference)?;
            (parsed.song_id, parsed.tier, Some(parsed.title))
        }
    };

    // Composite references carry no user; the song id stands in for it
    let user_id = non_empty(&metadata.user_id).unwrap_or_else(|| track_id.clone());
    let song_title = non_empty(&metadata.song_title)
        .or(title)
        .unwrap_or_else(|| UNTITLED.to_string());

    Ok(Order::Purchase {
        input: PurchaseInput {
            purchase_id: Some(purchase_id.to_string()),
            user_id,
            track_id,
            song_title,
            tier,
            currency,
            customer_email,
            paid_cents,
        },
        lyrics: non_empty(&metadata.lyrics),
    })
}

impl CheckoutSession {
    pub fn email(&self) -> Option<String> {
        non_empty(&self.customer_email).or_else(|| {
            self.customer_details
                .as_ref()
                .and_then(|details| non_empty(&details.email))
        })
    }

    pub fn order(&self) -> BillingResult<Order> {
        let is_subscription = self.mode.as_deref() == Some("subscription")
            || non_empty(&self.metadata.plan_type).is_some();

        if is_subscription {
            let user_id = non_empty(&self.metadata.user_id)
                .or_else(|| non_empty(&self.client_reference_id))
                .ok_or_else(|| {
                    BillingError::Validation("subscription checkout without userId".to_string())
                })?;
            let plan_id = non_empty(&self.metadata.plan_type).ok_or_else(|| {
                BillingError::Validation("subscription checkout without planType".to_string())
            })?;
            return Ok(Order::PlanChange { user_id, plan_id });
        }

        purchase_order(
            &self.metadata,
            self.client_reference_id.as_deref(),
            &self.id,
            self.email(),
            self.currency.as_deref(),
            self.amount_total,
        )
    }
}

impl OrderMetadata {
    /// Whether any order field is present at all
    pub fn is_empty(&self) -> bool {
        non_empty(&self.song_id).is_none()
            && non_empty(&self.tier).is_none()
            && non_empty(&self.plan_type).is_none()
    }
}

impl PaymentIntent {
    /// Intents created outside this service carry no order metadata
    pub fn has_order(&self) -> bool {
        !self.metadata.is_empty()
    }

    pub fn order(&self) -> BillingResult<Order> {
        if let Some(plan_id) = non_empty(&self.metadata.plan_type) {
            let user_id = non_empty(&self.metadata.user_id).ok_or_else(|| {
                BillingError::Validation("plan payment without userId".to_string())
            })?;
            return Ok(Order::PlanChange { user_id, plan_id });
        }

        purchase_order(
            &self.metadata,
            None,
            &self.id,
            non_empty(&self.receipt_email),
            self.currency.as_deref(),
            self.amount,
        )
    }
}

impl Subscription {
    /// True for statuses that leave the customer without a paid plan
    pub fn is_terminated(&self) -> bool {
        matches!(
            self.status.as_deref(),
            Some("canceled") | Some("unpaid") | Some("incomplete_expired")
        )
    }

    pub fn user_id(&self) -> BillingResult<String> {
        non_empty(&self.metadata.user_id).ok_or_else(|| {
            BillingError::Validation(format!("subscription '{}' without userId metadata", self.id))
        })
    }

    pub fn plan_id(&self) -> Option<String> {
        non_empty(&self.metadata.plan_type)
    }
}

fn decode_object<T: serde::de::DeserializeOwned>(event_type: &str, object: Value) -> BillingResult<T> {
    serde_json::from_value(object).map_err(|e| {
        BillingError::Validation(format!("malformed '{}' payload: {}", event_type, e))
    })
}

impl PaymentEvent {
    /// Decode a raw (already verified) webhook body
    pub fn decode(payload: &[u8]) -> BillingResult<Self> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)
            .map_err(|e| BillingError::Validation(format!("malformed webhook payload: {}", e)))?;

        let EventEnvelope {
            id,
            event_type,
            created,
            data,
        } = envelope;
        let created = created.and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        let kind = match event_type.as_str() {
            CHECKOUT_SESSION_COMPLETED => {
                PaymentEventKind::CheckoutCompleted(decode_object(&event_type, data.object)?)
            }
            PAYMENT_INTENT_SUCCEEDED => {
                PaymentEventKind::PaymentSucceeded(decode_object(&event_type, data.object)?)
            }
            SUBSCRIPTION_CREATED | SUBSCRIPTION_UPDATED => {
                PaymentEventKind::SubscriptionChanged(decode_object(&event_type, data.object)?)
            }
            SUBSCRIPTION_DELETED => {
                PaymentEventKind::SubscriptionCanceled(decode_object(&event_type, data.object)?)
            }
            _ => PaymentEventKind::Unrecognized,
        };

        Ok(Self {
            id,
            event_type,
            created,
            kind,
        })
    }

    /// Event time for ordering; receipt time when the provider sent none
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.created.unwrap_or_else(time::now)
    }
}
