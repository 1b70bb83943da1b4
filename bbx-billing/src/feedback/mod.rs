//! Lyric feedback engine
//!
//! [`analyzer::analyze`] and [`responses::respond`] are pure; the service
//! only adds persistence.

pub mod analyzer;
pub mod lexicon;
pub mod responses;
pub mod service;

pub use analyzer::{analyze, LyricAnalysis};
pub use responses::{respond, FeedbackCategory};
pub use service::{FeedbackRequest, FeedbackService, LyricFeedback};
