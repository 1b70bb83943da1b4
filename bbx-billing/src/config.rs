//! Configuration resolution for bbx-billing
//!
//! Webhook secret priority: Database -> ENV -> TOML, generated and stored
//! in the database when no source has one. Provider key and checkout
//! redirect priority: ENV -> TOML; without a key the offline provider is used.

use crate::error::{BillingError, BillingResult};
use crate::payments::CheckoutRedirects;
use bbx_common::api::{initialize_webhook_secret, load_webhook_secret, DEFAULT_TOLERANCE_SECS};
use bbx_common::config::TomlConfig;
use sqlx::SqlitePool;
use tracing::{info, warn};

pub const WEBHOOK_SECRET_ENV: &str = "BBX_WEBHOOK_SECRET";
pub const STRIPE_SECRET_KEY_ENV: &str = "BBX_STRIPE_SECRET_KEY";
pub const CHECKOUT_SUCCESS_URL_ENV: &str = "BBX_CHECKOUT_SUCCESS_URL";
pub const CHECKOUT_CANCEL_URL_ENV: &str = "BBX_CHECKOUT_CANCEL_URL";

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| is_valid_key(v))
}

fn toml_value(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| is_valid_key(v))
}

/// Resolve the webhook signing secret
pub async fn resolve_webhook_secret(db: &SqlitePool, toml_config: &TomlConfig) -> BillingResult<String> {
    let db_secret = load_webhook_secret(db).await?;
    let env_secret = env_value(WEBHOOK_SECRET_ENV);
    let toml_secret = toml_value(&toml_config.webhook_secret);

    let sources: Vec<&str> = [
        db_secret.as_ref().map(|_| "database"),
        env_secret.as_ref().map(|_| "environment"),
        toml_secret.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "Webhook secret found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(secret) = db_secret {
        info!("Webhook secret loaded from database");
        return Ok(secret);
    }
    if let Some(secret) = env_secret {
        info!("Webhook secret loaded from environment variable");
        return Ok(secret);
    }
    if let Some(secret) = toml_secret {
        info!("Webhook secret loaded from TOML config");
        return Ok(secret);
    }

    let secret = initialize_webhook_secret(db).await?;
    warn!(
        "No webhook secret configured; generated one and stored it in the database. \
         Configure the payment provider with the value from the settings table or set {}",
        WEBHOOK_SECRET_ENV
    );
    Ok(secret)
}

/// Resolve the payment provider API key (None = offline provider)
pub fn resolve_stripe_secret_key(toml_config: &TomlConfig) -> Option<String> {
    if let Some(key) = env_value(STRIPE_SECRET_KEY_ENV) {
        info!("Payment provider key loaded from environment variable");
        return Some(key);
    }
    if let Some(key) = toml_value(&toml_config.stripe_secret_key) {
        info!("Payment provider key loaded from TOML config");
        return Some(key);
    }
    None
}

fn redirect_url(env_name: &str, toml_url: &Option<String>) -> BillingResult<Option<String>> {
    let url = match env_value(env_name) {
        Some(url) => Some(url),
        None => toml_value(toml_url),
    };
    match url {
        Some(url) if !(url.starts_with("https://") || url.starts_with("http://")) => Err(
            BillingError::Validation(format!("{} must be an http(s) URL, got '{}'", env_name, url)),
        ),
        other => Ok(other),
    }
}

/// Resolve hosted checkout redirect URLs
///
/// `None` when neither is configured; configuring only one is an error.
pub fn resolve_checkout_redirects(toml_config: &TomlConfig) -> BillingResult<Option<CheckoutRedirects>> {
    let success = redirect_url(CHECKOUT_SUCCESS_URL_ENV, &toml_config.checkout_success_url)?;
    let cancel = redirect_url(CHECKOUT_CANCEL_URL_ENV, &toml_config.checkout_cancel_url)?;

    match (success, cancel) {
        (Some(success_url), Some(cancel_url)) => Ok(Some(CheckoutRedirects {
            success_url,
            cancel_url,
        })),
        (None, None) => Ok(None),
        _ => Err(BillingError::Validation(
            "checkout success and cancel URLs must be configured together".to_string(),
        )),
    }
}

/// Signature timestamp tolerance in seconds
pub fn resolve_signature_tolerance(toml_config: &TomlConfig) -> BillingResult<i64> {
    match toml_config.signature_tolerance_secs {
        None => Ok(DEFAULT_TOLERANCE_SECS),
        Some(secs) if secs > 0 => Ok(secs),
        Some(secs) => Err(BillingError::Validation(format!(
            "signature_tolerance_secs must be positive, got {}",
            secs
        ))),
    }
}
