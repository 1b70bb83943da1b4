//! Plan catalog and per-user generation quotas

pub mod plans;
pub mod store;

pub use plans::{Plan, PlanCatalog, FREE_PLAN_ID, UNLIMITED};
pub use store::{EntitlementStore, QuotaDecision, UserEntitlement};
