//! # BBX Common Library
//!
//! Shared code for the BBX billing services:
//! - Error and result types
//! - Configuration loading and root folder resolution
//! - SQLite initialization and schema migrations
//! - Webhook signature primitives
//! - Timestamp utilities

pub mod api;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
