//! # Features Module
//!
//! Feature slices of the assistant. Each has its own version and changelog.
//!
//! | Feature | Version | Description |
//! |---------|---------|-------------|
//! | analytics | 1.1.0 | LLM token usage tracking |
//! | assistant | 1.1.0 | Completion client, summaries, quick replies |
//! | conversation | 1.2.0 | Inbound message handling and retention |
//! | intent | 1.0.0 | Hybrid rule/LLM intent parsing |
//! | reminders | 2.0.0 | Reminder lifecycle, delay queue, delivery |
//! | transport | 1.2.0 | Meta, Twilio, Discord and console messaging |

pub mod analytics;
pub mod assistant;
pub mod conversation;
pub mod intent;
pub mod reminders;
pub mod transport;

pub use analytics::{CostBucket, UsageTracker};
pub use assistant::{CompletionClient, OpenAiClient};
pub use conversation::{Conversation, ConversationSettings};
pub use intent::{IntentParser, ParsedIntent, RuleMatcher};
pub use reminders::{JobQueue, ReminderDelivery, ReminderLifecycle};
pub use transport::{build_transport, InboundMessage, Transport};
