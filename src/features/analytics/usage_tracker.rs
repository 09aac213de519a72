//! # Feature: LLM Usage Tracking
//!
//! Captures chat-completion token usage for cost analysis. Events are queued
//! on an unbounded channel and written by a background task so completions are
//! never delayed by storage.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.2.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: CostBucket categorization by assistant feature
//! - 1.0.0: Initial release with async background logging

use crate::database::Database;
use log::{debug, error, warn};
use tokio::sync::mpsc;

/// OpenAI chat pricing (per 1K tokens)
pub mod pricing {
    pub const GPT4O_INPUT_PER_1K: f64 = 0.0025;
    pub const GPT4O_OUTPUT_PER_1K: f64 = 0.01;

    pub const GPT4O_MINI_INPUT_PER_1K: f64 = 0.00015;
    pub const GPT4O_MINI_OUTPUT_PER_1K: f64 = 0.0006;

    pub const GPT4_INPUT_PER_1K: f64 = 0.03;
    pub const GPT4_OUTPUT_PER_1K: f64 = 0.06;

    pub const GPT35_TURBO_INPUT_PER_1K: f64 = 0.0005;
    pub const GPT35_TURBO_OUTPUT_PER_1K: f64 = 0.0015;

    /// Estimated cost of one completion; unknown models price as GPT-3.5 Turbo
    pub fn calculate_chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        let model_lower = model.to_lowercase();

        let (input_rate, output_rate) = if model_lower.contains("gpt-4o-mini") {
            (GPT4O_MINI_INPUT_PER_1K, GPT4O_MINI_OUTPUT_PER_1K)
        } else if model_lower.contains("gpt-4o") {
            (GPT4O_INPUT_PER_1K, GPT4O_OUTPUT_PER_1K)
        } else if model_lower.contains("gpt-4") {
            (GPT4_INPUT_PER_1K, GPT4_OUTPUT_PER_1K)
        } else {
            (GPT35_TURBO_INPUT_PER_1K, GPT35_TURBO_OUTPUT_PER_1K)
        };

        (input_tokens as f64 / 1000.0 * input_rate) + (output_tokens as f64 / 1000.0 * output_rate)
    }
}

/// Which assistant feature triggered a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostBucket {
    /// LLM tier of the intent parser
    Intent,
    /// Thread summaries
    Summary,
    /// Quick-reply suggestions
    QuickReply,
}

impl CostBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostBucket::Intent => "intent",
            CostBucket::Summary => "summary",
            CostBucket::QuickReply => "quick_reply",
        }
    }
}

#[derive(Debug, Clone)]
struct ChatUsage {
    model: String,
    input_tokens: u32,
    output_tokens: u32,
    total_tokens: u32,
    user_id: String,
    cost_bucket: CostBucket,
}

#[derive(Clone)]
pub struct UsageTracker {
    sender: mpsc::UnboundedSender<ChatUsage>,
}

impl UsageTracker {
    /// Create a tracker and spawn its background writer
    pub fn new(database: Database) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Self::background_logger(database, receiver));
        UsageTracker { sender }
    }

    /// Queue a chat usage event (non-blocking)
    pub fn log_chat(
        &self,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        total_tokens: u32,
        user_id: &str,
        cost_bucket: CostBucket,
    ) {
        let event = ChatUsage {
            model: model.to_string(),
            input_tokens,
            output_tokens,
            total_tokens,
            user_id: user_id.to_string(),
            cost_bucket,
        };

        if let Err(e) = self.sender.send(event) {
            warn!("Failed to queue chat usage event: {e}");
        }
    }

    async fn background_logger(database: Database, mut receiver: mpsc::UnboundedReceiver<ChatUsage>) {
        while let Some(event) = receiver.recv().await {
            if let Err(e) = Self::store_event(&database, &event).await {
                error!("Failed to store usage event: {e}");
            }
        }
    }

    async fn store_event(database: &Database, event: &ChatUsage) -> anyhow::Result<()> {
        let cost = pricing::calculate_chat_cost(&event.model, event.input_tokens, event.output_tokens);

        database
            .log_llm_usage(
                &event.model,
                event.input_tokens,
                event.output_tokens,
                event.total_tokens,
                cost,
                &event.user_id,
                event.cost_bucket.as_str(),
            )
            .await?;

        debug!(
            "Logged chat usage: {} tokens (model: {}, bucket: {}, cost: ${:.6})",
            event.total_tokens,
            event.model,
            event.cost_bucket.as_str(),
            cost
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pricing_by_model() {
        let mini = pricing::calculate_chat_cost("gpt-4o-mini", 1000, 1000);
        assert!((mini - 0.00075).abs() < 1e-9);
        let turbo = pricing::calculate_chat_cost("gpt-3.5-turbo", 1000, 1000);
        assert!((turbo - 0.002).abs() < 1e-9);
        let unknown = pricing::calculate_chat_cost("llama-3", 1000, 1000);
        assert!((unknown - turbo).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_events_reach_database() {
        let database = Database::in_memory().unwrap();
        let tracker = UsageTracker::new(database.clone());

        tracker.log_chat("gpt-3.5-turbo", 200, 40, 240, "u1", CostBucket::Summary);
        tracker.log_chat("gpt-3.5-turbo", 100, 20, 120, "u1", CostBucket::QuickReply);

        let mut tokens = 0;
        for _ in 0..50 {
            tokens = database.llm_usage_totals("summary").await.unwrap().0;
            if tokens > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tokens, 240);
    }
}
