//! # Assistant Feature
//!
//! LLM completion client plus the thread summarizer and quick-reply
//! generator built on it.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.2.0
//! - **Toggleable**: true (disabled when no OpenAI key is configured)

pub mod llm;
pub mod quick_reply;
pub mod summarize;

pub use llm::{CompletionClient, CompletionOptions, OpenAiClient};
pub use quick_reply::{generate_quick_replies, FALLBACK_REPLIES};
pub use summarize::{summarize_thread, ThreadSummary, SUMMARY_WINDOW};
