//! Webhook signature verification
//!
//! The payment provider signs each delivery with a shared secret:
//!
//! - Header format: `t=<unix seconds>,v1=<hex signature>[,v1=<hex>...]`
//! - Signature: HMAC-SHA256 over `"<t>.<raw body>"` keyed by the secret
//! - The timestamp must be within the tolerance window (default 300 s)
//!
//! Verification runs before any event decoding; a failure means the
//! delivery is rejected with no side effects.
//!
//! # Pure Functions
//!
//! Apart from secret storage, everything here is pure and framework-free.

use hmac::{Hmac, Mac};
use sha2::Sha256;

#[cfg(feature = "sqlx")]
use sqlx::SqlitePool;

type HmacSha256 = Hmac<Sha256>;

/// Default allowed distance between signature timestamp and local clock
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Settings key holding the webhook signing secret
pub const WEBHOOK_SECRET_SETTING: &str = "webhook_signing_secret";

// ========================================
// Error Types
// ========================================

/// Signature verification failures
#[derive(Debug, Clone, PartialEq)]
pub enum SignatureError {
    /// Header missing or not in `t=...,v1=...` form
    MalformedHeader(String),

    /// Timestamp outside acceptable window
    InvalidTimestamp { timestamp: i64, now: i64, reason: String },

    /// No provided signature matches the computed one
    InvalidSignature,

    /// Secret could not be used as an HMAC key
    InvalidSecret,

    /// Database error loading or storing the secret
    DatabaseError(String),
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::MalformedHeader(reason) => {
                write!(f, "Malformed signature header: {}", reason)
            }
            SignatureError::InvalidTimestamp { reason, .. } => {
                write!(f, "Invalid timestamp: {}", reason)
            }
            SignatureError::InvalidSignature => write!(f, "Invalid signature"),
            SignatureError::InvalidSecret => write!(f, "Invalid signing secret"),
            SignatureError::DatabaseError(err) => write!(f, "Database error: {}", err),
        }
    }
}

impl std::error::Error for SignatureError {}

// ========================================
// Header Parsing
// ========================================

/// Parsed signature header
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    /// All `v1` signatures (providers send several during secret rotation)
    pub signatures: Vec<String>,
}

/// Parse `t=<ts>,v1=<sig>` into its parts
///
/// # Examples
///
/// ```
/// use bbx_common::api::signature::parse_signature_header;
///
/// let parsed = parse_signature_header("t=1700000000,v1=abcd").unwrap();
/// assert_eq!(parsed.timestamp, 1700000000);
/// assert_eq!(parsed.signatures, vec!["abcd".to_string()]);
/// ```
pub fn parse_signature_header(header: &str) -> Result<SignatureHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|e| {
                    SignatureError::MalformedHeader(format!("bad timestamp: {}", e))
                })?)
            }
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| SignatureError::MalformedHeader("missing t=".to_string()))?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader("missing v1=".to_string()));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

// ========================================
// Timestamp Validation
// ========================================

/// Validate that `timestamp` is within `tolerance_secs` of `now` (both directions)
pub fn validate_timestamp(timestamp: i64, now: i64, tolerance_secs: i64) -> Result<(), SignatureError> {
    let diff = now - timestamp;

    if diff.abs() > tolerance_secs {
        let direction = if diff > 0 { "old" } else { "in future" };
        return Err(SignatureError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!(
                "Timestamp {}s {} (max {}s)",
                diff.abs(),
                direction,
                tolerance_secs
            ),
        });
    }

    Ok(())
}

// ========================================
// Signature Calculation and Validation
// ========================================

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Compute the hex HMAC-SHA256 signature for a payload
///
/// # Examples
///
/// ```
/// use bbx_common::api::signature::compute_signature;
///
/// let sig = compute_signature("whsec_test", 1700000000, b"{}");
/// assert_eq!(sig.len(), 64);
/// ```
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    match mac_for(secret, timestamp, payload) {
        Ok(mac) => hex::encode(mac.finalize().into_bytes()),
        // HMAC accepts keys of any length; unreachable in practice
        Err(_) => String::new(),
    }
}

/// Build a complete signature header for a payload
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    format!("t={},v1={}", timestamp, compute_signature(secret, timestamp, payload))
}

/// Verify a signature header against the raw payload at a given clock reading
///
/// Signature bytes are compared in constant time.
pub fn verify_signature_at(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let parsed = parse_signature_header(header)?;
    validate_timestamp(parsed.timestamp, now, tolerance_secs)?;

    for candidate in &parsed.signatures {
        let Ok(bytes) = hex::decode(candidate) else {
            continue;
        };
        let mac = mac_for(secret, parsed.timestamp, payload)?;
        if mac.verify_slice(&bytes).is_ok() {
            return Ok(());
        }
    }

    Err(SignatureError::InvalidSignature)
}

// ========================================
// Secret Management
// ========================================

/// Load the webhook signing secret from the settings table
///
/// Returns `None` when no secret has been stored.
#[cfg(feature = "sqlx")]
pub async fn load_webhook_secret(db: &SqlitePool) -> Result<Option<String>, SignatureError> {
    let result: Option<(Option<String>,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(WEBHOOK_SECRET_SETTING)
            .fetch_optional(db)
            .await
            .map_err(|e| SignatureError::DatabaseError(e.to_string()))?;

    Ok(result
        .and_then(|(value,)| value)
        .filter(|value| !value.trim().is_empty()))
}

/// Generate and store a random webhook signing secret
#[cfg(feature = "sqlx")]
pub async fn initialize_webhook_secret(db: &SqlitePool) -> Result<String, SignatureError> {
    use rand::RngCore;

    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    let secret = format!("whsec_{}", hex::encode(bytes));

    sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
        .bind(WEBHOOK_SECRET_SETTING)
        .bind(&secret)
        .execute(db)
        .await
        .map_err(|e| SignatureError::DatabaseError(e.to_string()))?;

    Ok(secret)
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";
    const NOW: i64 = 1_730_000_000;

    #[test]
    fn test_valid_signature_accepted() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = sign_payload(SECRET, NOW, payload);
        assert!(verify_signature_at(payload, &header, SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = sign_payload("whsec_other", NOW, payload);
        assert_eq!(
            verify_signature_at(payload, &header, SECRET, 300, NOW),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = sign_payload(SECRET, NOW, br#"{"amount":299}"#);
        assert!(verify_signature_at(br#"{"amount":1}"#, &header, SECRET, 300, NOW).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = b"{}";
        let header = sign_payload(SECRET, NOW - 301, payload);
        let result = verify_signature_at(payload, &header, SECRET, 300, NOW);
        assert!(matches!(result, Err(SignatureError::InvalidTimestamp { .. })));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let payload = b"{}";
        let header = sign_payload(SECRET, NOW + 600, payload);
        assert!(verify_signature_at(payload, &header, SECRET, 300, NOW).is_err());
    }

    #[test]
    fn test_any_matching_v1_accepted() {
        // Secret rotation: an old and a new signature in the same header
        let payload = b"{}";
        let good = compute_signature(SECRET, NOW, payload);
        let header = format!("t={},v1={},v1={}", NOW, "00".repeat(32), good);
        assert!(verify_signature_at(payload, &header, SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn test_malformed_headers() {
        assert!(matches!(
            parse_signature_header("v1=abcd"),
            Err(SignatureError::MalformedHeader(_))
        ));
        assert!(matches!(
            parse_signature_header("t=123"),
            Err(SignatureError::MalformedHeader(_))
        ));
        assert!(matches!(
            parse_signature_header("t=abc,v1=00"),
            Err(SignatureError::MalformedHeader(_))
        ));
        assert!(matches!(
            parse_signature_header(""),
            Err(SignatureError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        let header = format!("t={},v1=not-hex", NOW);
        assert_eq!(
            verify_signature_at(b"{}", &header, SECRET, 300, NOW),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = compute_signature(SECRET, NOW, b"payload");
        let b = compute_signature(SECRET, NOW, b"payload");
        assert_eq!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, compute_signature(SECRET, NOW + 1, b"payload"));
    }

    #[cfg(feature = "sqlx")]
    #[tokio::test]
    async fn test_secret_initialize_then_load() {
        let pool = crate::db::init_memory_database().await.unwrap();

        assert_eq!(load_webhook_secret(&pool).await.unwrap(), None);

        let secret = initialize_webhook_secret(&pool).await.unwrap();
        assert!(secret.starts_with("whsec_"));
        assert_eq!(load_webhook_secret(&pool).await.unwrap(), Some(secret));
    }
}
