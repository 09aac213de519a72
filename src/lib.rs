// Core layer - shared types and configuration
pub mod core;

// Features layer - all feature modules
pub mod features;

// Infrastructure
pub mod database;
pub mod rate_limiter;

pub use core::Config;
pub use database::Database;
pub use rate_limiter::RateLimiter;

pub use features::{
    // Assistant
    CompletionClient, OpenAiClient,
    // Analytics
    CostBucket, UsageTracker,
    // Conversation
    Conversation, ConversationSettings,
    // Intent
    IntentParser, ParsedIntent, RuleMatcher,
    // Reminders
    JobQueue, ReminderDelivery, ReminderLifecycle,
    // Transport
    build_transport, InboundMessage, Transport,
};
