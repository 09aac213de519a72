//! # Conversation Feature
//!
//! Inbound message handling and message retention.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

pub mod handler;
pub mod retention;

pub use handler::{format_confirmation_time, Conversation, ConversationSettings};
pub use retention::{purge_once, spawn_retention_loop, RETENTION_INTERVAL};
