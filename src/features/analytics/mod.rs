//! # Analytics Feature
//!
//! LLM token usage tracking.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.2.0
//! - **Toggleable**: false

pub mod usage_tracker;

pub use usage_tracker::{pricing, CostBucket, UsageTracker};
