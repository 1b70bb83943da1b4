//! Webhook event handlers
//!
//! Every handler is idempotent: plan changes are upserts ordered by event
//! time, and purchases upsert on (user_id, track_id).

use super::events::{
    Order, PaymentEvent, PaymentEventKind, CHECKOUT_SESSION_COMPLETED, PAYMENT_INTENT_SUCCEEDED,
    SUBSCRIPTION_CREATED, SUBSCRIPTION_DELETED, SUBSCRIPTION_UPDATED,
};
use super::fulfillment::PurchaseFulfillment;
use super::processor::{EventHandler, HandlerOutcome, HandlerRegistry};
use crate::entitlements::{EntitlementStore, FREE_PLAN_ID};
use crate::error::{BillingError, BillingResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

fn unexpected(event: &PaymentEvent) -> BillingError {
    BillingError::Validation(format!(
        "handler received mismatched payload for '{}'",
        event.event_type
    ))
}

/// Apply a plan change unless a later event already did
async fn change_plan(
    event: &PaymentEvent,
    entitlements: &EntitlementStore,
    user_id: &str,
    plan_id: &str,
) -> BillingResult<HandlerOutcome> {
    match entitlements
        .apply_plan_change(user_id, plan_id, event.occurred_at())
        .await?
    {
        Some(entitlement) => Ok(HandlerOutcome::PlanUpdated {
            user_id: entitlement.user_id,
            plan_id: entitlement.plan_id,
        }),
        None => {
            info!(event_id = %event.id, user_id, plan_id, "Superseded by a later plan change");
            Ok(HandlerOutcome::Ignored)
        }
    }
}

async fn apply_order(
    event: &PaymentEvent,
    order: Order,
    entitlements: &EntitlementStore,
    fulfillment: &PurchaseFulfillment,
) -> BillingResult<HandlerOutcome> {
    match order {
        Order::PlanChange { user_id, plan_id } => {
            change_plan(event, entitlements, &user_id, &plan_id).await
        }
        Order::Purchase { input, lyrics } => {
            let fulfilled = fulfillment.fulfill(&input, lyrics.as_deref()).await?;
            Ok(HandlerOutcome::Purchased {
                purchase_guid: fulfilled.purchase.guid,
                license_id: fulfilled.license.license_id,
            })
        }
    }
}

/// `checkout.session.completed`: subscription checkout or one-off purchase
pub struct CheckoutCompletedHandler {
    entitlements: Arc<EntitlementStore>,
    fulfillment: Arc<PurchaseFulfillment>,
}

#[async_trait]
impl EventHandler for CheckoutCompletedHandler {
    async fn handle(&self, event: &PaymentEvent) -> BillingResult<HandlerOutcome> {
        let PaymentEventKind::CheckoutCompleted(session) = &event.kind else {
            return Err(unexpected(event));
        };
        info!(event_id = %event.id, session_id = %session.id, "Checkout completed");
        apply_order(event, session.order()?, &self.entitlements, &self.fulfillment).await
    }
}

/// `payment_intent.succeeded`: plan payment or one-off purchase
pub struct PaymentSucceededHandler {
    entitlements: Arc<EntitlementStore>,
    fulfillment: Arc<PurchaseFulfillment>,
}

#[async_trait]
impl EventHandler for PaymentSucceededHandler {
    async fn handle(&self, event: &PaymentEvent) -> BillingResult<HandlerOutcome> {
        let PaymentEventKind::PaymentSucceeded(intent) = &event.kind else {
            return Err(unexpected(event));
        };
        if !intent.has_order() {
            info!(event_id = %event.id, intent_id = %intent.id, "Payment intent without order metadata, ignoring");
            return Ok(HandlerOutcome::Ignored);
        }
        info!(event_id = %event.id, intent_id = %intent.id, "Payment succeeded");
        apply_order(event, intent.order()?, &self.entitlements, &self.fulfillment).await
    }
}

/// `customer.subscription.created` / `.updated`
pub struct SubscriptionChangedHandler {
    entitlements: Arc<EntitlementStore>,
}

#[async_trait]
impl EventHandler for SubscriptionChangedHandler {
    async fn handle(&self, event: &PaymentEvent) -> BillingResult<HandlerOutcome> {
        let PaymentEventKind::SubscriptionChanged(subscription) = &event.kind else {
            return Err(unexpected(event));
        };
        let user_id = subscription.user_id()?;

        let plan_id = if subscription.is_terminated() {
            FREE_PLAN_ID.to_string()
        } else {
            match subscription.plan_id() {
                Some(plan_id) => plan_id,
                None => {
                    warn!(subscription_id = %subscription.id, "Subscription without planType, ignoring");
                    return Ok(HandlerOutcome::Ignored);
                }
            }
        };

        change_plan(event, &self.entitlements, &user_id, &plan_id).await
    }
}

/// `customer.subscription.deleted`: back to the free plan
pub struct SubscriptionCanceledHandler {
    entitlements: Arc<EntitlementStore>,
}

#[async_trait]
impl EventHandler for SubscriptionCanceledHandler {
    async fn handle(&self, event: &PaymentEvent) -> BillingResult<HandlerOutcome> {
        let PaymentEventKind::SubscriptionCanceled(subscription) = &event.kind else {
            return Err(unexpected(event));
        };
        let user_id = subscription.user_id()?;

        info!(user_id = %user_id, subscription_id = %subscription.id, "Subscription canceled");
        change_plan(event, &self.entitlements, &user_id, FREE_PLAN_ID).await
    }
}

/// Registry with every supported event type wired up
pub fn default_registry(
    entitlements: Arc<EntitlementStore>,
    fulfillment: Arc<PurchaseFulfillment>,
) -> HandlerRegistry {
    let subscription_changed = Arc::new(SubscriptionChangedHandler {
        entitlements: entitlements.clone(),
    });

    HandlerRegistry::new()
        .with(
            CHECKOUT_SESSION_COMPLETED,
            Arc::new(CheckoutCompletedHandler {
                entitlements: entitlements.clone(),
                fulfillment: fulfillment.clone(),
            }),
        )
        .with(
            PAYMENT_INTENT_SUCCEEDED,
            Arc::new(PaymentSucceededHandler {
                entitlements: entitlements.clone(),
                fulfillment,
            }),
        )
        .with(SUBSCRIPTION_CREATED, subscription_changed.clone())
        .with(SUBSCRIPTION_UPDATED, subscription_changed)
        .with(
            SUBSCRIPTION_DELETED,
            Arc::new(SubscriptionCanceledHandler { entitlements }),
        )
}
