//! Payment provider integration
//!
//! - [`events`]: webhook payload decoding into a typed event union
//! - [`processor`]: signature check, audit trail and handler registry dispatch
//! - [`handlers`]: one handler per event type
//! - [`fulfillment`]: purchase -> ledger -> license -> feedback pipeline
//! - [`provider`]: outbound payment intent / checkout session creation
//! - [`checkout`]: client payment requests priced from the tier table

pub mod checkout;
pub mod events;
pub mod fulfillment;
pub mod handlers;
pub mod processor;
pub mod provider;

pub use events::{Order, PaymentEvent, PaymentEventKind};
pub use fulfillment::{FulfilledPurchase, PurchaseFulfillment};
pub use handlers::default_registry;
pub use processor::{
    EventHandler, HandlerOutcome, HandlerRegistry, PaymentEventProcessor, ProcessedEvent,
};
pub use provider::{
    CheckoutRedirects, OfflineProvider, PaymentHandle, PaymentProvider, StripeProvider,
};
