//! One-off purchase tiers and their fixed prices
//!
//! Checkout requests and ledger rows both read prices from here, so the
//! amount charged and the amount recorded cannot drift apart.

use crate::error::{BillingError, BillingResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Only currency the price table is denominated in
pub const CURRENCY: &str = "usd";

/// Download tier of a purchased track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// MP3 download, personal use
    Base,
    /// Lossless download and stems, personal use
    Premium,
    /// Lossless download and stems with commercial rights
    Commercial,
}

/// Rights granted by a license
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rights {
    Personal,
    Commercial,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Base, Tier::Premium, Tier::Commercial];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Base => "base",
            Tier::Premium => "premium",
            Tier::Commercial => "commercial",
        }
    }

    /// Price in cents (USD)
    pub fn price_cents(&self) -> i64 {
        match self {
            Tier::Base => 299,
            Tier::Premium => 999,
            Tier::Commercial => 2999,
        }
    }

    pub fn rights(&self) -> Rights {
        match self {
            Tier::Base | Tier::Premium => Rights::Personal,
            Tier::Commercial => Rights::Commercial,
        }
    }

    /// Human-readable product name used on checkout pages and license documents
    pub fn display_name(&self) -> &'static str {
        match self {
            Tier::Base => "Base Download",
            Tier::Premium => "Premium Download",
            Tier::Commercial => "Commercial License",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = BillingError;

    fn from_str(s: &str) -> BillingResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" => Ok(Tier::Base),
            "premium" => Ok(Tier::Premium),
            "commercial" => Ok(Tier::Commercial),
            other => Err(BillingError::Validation(format!("unknown tier '{}'", other))),
        }
    }
}

/// Reject currencies the price table does not cover
pub fn validate_currency(currency: &str) -> BillingResult<String> {
    let normalized = currency.trim().to_ascii_lowercase();
    if normalized != CURRENCY {
        return Err(BillingError::Validation(format!(
            "unsupported currency '{}' (only '{}')",
            currency, CURRENCY
        )));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse_is_case_insensitive() {
        assert_eq!("BASE".parse::<Tier>().unwrap(), Tier::Base);
        assert_eq!(" premium ".parse::<Tier>().unwrap(), Tier::Premium);
        assert!("platinum".parse::<Tier>().is_err());
    }

    #[test]
    fn test_price_table() {
        assert_eq!(Tier::Base.price_cents(), 299);
        assert_eq!(Tier::Premium.price_cents(), 999);
        assert_eq!(Tier::Commercial.price_cents(), 2999);
    }

    #[test]
    fn test_only_commercial_grants_commercial_rights() {
        assert_eq!(Tier::Base.rights(), Rights::Personal);
        assert_eq!(Tier::Premium.rights(), Rights::Personal);
        assert_eq!(Tier::Commercial.rights(), Rights::Commercial);
    }

    #[test]
    fn test_currency_validation() {
        assert_eq!(validate_currency("USD").unwrap(), "usd");
        assert!(validate_currency("eur").is_err());
    }
}
