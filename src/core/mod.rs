//! # Core Module
//!
//! Configuration and outbound message shaping shared by every feature.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Add response module with per-provider body chunking
//! - 1.0.0: Initial creation with config module

pub mod config;
pub mod response;

pub use config::{Config, MessagingProvider};
pub use response::{body_limit, chunk_for_provider, chunk_text, truncate_chars};
