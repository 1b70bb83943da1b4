//! API module for shared HTTP API functionality
//!
//! # Design Principle
//!
//! This module contains ONLY:
//! - Pure functions (no HTTP framework dependencies)
//! - Database operations (via sqlx)
//!
//! Services wrap these with framework-specific extractors (Axum, etc.).

pub mod signature;

pub use signature::{
    compute_signature, parse_signature_header, sign_payload, validate_timestamp,
    verify_signature_at, SignatureError, SignatureHeader,
    DEFAULT_TOLERANCE_SECS,
};

#[cfg(feature = "sqlx")]
pub use signature::{initialize_webhook_secret, load_webhook_secret};
