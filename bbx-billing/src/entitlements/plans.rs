//! Plan definitions
//!
//! The catalog is loaded once at startup and never mutated afterwards.

use crate::error::{BillingError, BillingResult};
use bbx_common::config::PlanConfig;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Quota value meaning "no monthly limit"
pub const UNLIMITED: i64 = -1;

/// Plan every user starts on, and falls back to on cancellation
pub const FREE_PLAN_ID: &str = "free";

/// Subscription plan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    /// Songs per calendar month, or [`UNLIMITED`]
    pub monthly_quota: i64,
    pub features: BTreeSet<String>,
    pub audio_quality: Vec<String>,
    pub price_cents: i64,
}

impl Plan {
    pub fn new(
        id: &str,
        monthly_quota: i64,
        features: &[&str],
        audio_quality: &[&str],
        price_cents: i64,
    ) -> Self {
        Self {
            id: id.to_string(),
            monthly_quota,
            features: features.iter().map(|f| f.to_string()).collect(),
            audio_quality: audio_quality.iter().map(|q| q.to_string()).collect(),
            price_cents,
        }
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// Monthly song quota (-1 = unlimited)
    pub fn quota(&self) -> i64 {
        self.monthly_quota
    }

    pub fn is_unlimited(&self) -> bool {
        self.monthly_quota < 0
    }

    /// Whether a user who already created `used` songs this month may create another
    pub fn allows(&self, used: i64) -> bool {
        self.is_unlimited() || used < self.monthly_quota
    }
}

impl TryFrom<&PlanConfig> for Plan {
    type Error = BillingError;

    fn try_from(config: &PlanConfig) -> BillingResult<Self> {
        if config.id.trim().is_empty() {
            return Err(BillingError::Validation("plan id cannot be empty".to_string()));
        }
        if config.monthly_quota < UNLIMITED {
            return Err(BillingError::Validation(format!(
                "plan '{}' has invalid monthly_quota {}",
                config.id, config.monthly_quota
            )));
        }
        if config.price_cents < 0 {
            return Err(BillingError::Validation(format!(
                "plan '{}' has negative price",
                config.id
            )));
        }

        Ok(Self {
            id: config.id.trim().to_string(),
            monthly_quota: config.monthly_quota,
            features: config.features.iter().cloned().collect(),
            audio_quality: config.audio_quality.clone(),
            price_cents: config.price_cents,
        })
    }
}

/// Immutable set of plans keyed by id
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: BTreeMap<String, Plan>,
}

impl PlanCatalog {
    /// Built-in plans used when the config file does not define any
    pub fn builtin() -> Self {
        let plans = vec![
            Plan::new(FREE_PLAN_ID, 3, &["basic_generation"], &["standard"], 0),
            Plan::new(
                "creator",
                25,
                &["basic_generation", "voice_cloning", "commercial_license"],
                &["standard", "high"],
                999,
            ),
            Plan::new(
                "pro",
                UNLIMITED,
                &[
                    "basic_generation",
                    "voice_cloning",
                    "commercial_license",
                    "stem_export",
                    "priority_queue",
                ],
                &["standard", "high", "lossless"],
                2999,
            ),
        ];

        Self {
            plans: plans.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Build from configured plans; the built-in catalog is used for an empty list
    pub fn from_config(configs: &[PlanConfig]) -> BillingResult<Self> {
        if configs.is_empty() {
            return Ok(Self::builtin());
        }

        let mut plans = BTreeMap::new();
        for config in configs {
            let plan = Plan::try_from(config)?;
            if plans.insert(plan.id.clone(), plan).is_some() {
                return Err(BillingError::Validation(format!(
                    "duplicate plan id '{}'",
                    config.id
                )));
            }
        }

        if !plans.contains_key(FREE_PLAN_ID) {
            return Err(BillingError::Validation(format!(
                "plan catalog must define the '{}' plan",
                FREE_PLAN_ID
            )));
        }

        Ok(Self { plans })
    }

    pub fn get(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.get(plan_id)
    }

    /// Plan lookup that fails with a validation error for unknown ids
    pub fn require(&self, plan_id: &str) -> BillingResult<&Plan> {
        self.get(plan_id)
            .ok_or_else(|| BillingError::Validation(format!("unknown plan '{}'", plan_id)))
    }

    pub fn free_plan(&self) -> &Plan {
        // from_config and builtin both guarantee the free plan exists
        &self.plans[FREE_PLAN_ID]
    }

    /// Plan for a stored plan id, degrading to the free plan if it was removed from config
    pub fn resolve(&self, plan_id: &str) -> &Plan {
        self.get(plan_id).unwrap_or_else(|| {
            tracing::warn!(plan_id, "Stored plan no longer in catalog, applying free plan limits");
            self.free_plan()
        })
    }

    pub fn plans(&self) -> impl Iterator<Item = &Plan> {
        self.plans.values()
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
