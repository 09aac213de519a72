//! # Feature: Intent Parsing
//!
//! Hybrid classification of inbound messages: deterministic rules first, an
//! LLM tier for whatever the rules cannot resolve confidently.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Tier cascade with configurable threshold
//! - 1.1.0: LLM fallback
//! - 1.0.0: Rule matcher

pub mod llm_fallback;
pub mod parser;
pub mod rules;
pub mod types;

pub use llm_fallback::{IntentReplyError, LlmFallback};
pub use parser::{IntentParser, IntentStrategy, DEFAULT_CONFIDENCE_THRESHOLD};
pub use rules::{normalize, RuleMatcher};
pub use types::{
    is_schedulable, schedulable_after, IntentData, IntentType, ParseContext, ParsedIntent,
    Recurrence, MAX_SCHEDULABLE_YEAR,
};
