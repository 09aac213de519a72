//! # LLM Completion Client
//!
//! Single-prompt chat completions behind a trait so the intent tier and the
//! assistant helpers can be driven by a scripted client in tests.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.2.0
//!
//! ## Changelog
//! - 1.1.0: Usage logged per cost bucket
//! - 1.0.0: Initial release

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use openai::chat::{ChatCompletion, ChatCompletionMessage, ChatCompletionMessageRole};

use crate::features::analytics::{CostBucket, UsageTracker};

/// Sampling and attribution settings for one completion
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub cost_bucket: CostBucket,
    /// Attributed in the usage log; "system" when absent
    pub user_id: Option<String>,
}

impl CompletionOptions {
    pub fn new(temperature: f32, max_tokens: u32, cost_bucket: CostBucket) -> Self {
        Self {
            temperature,
            max_tokens,
            cost_bucket,
            user_id: None,
        }
    }

    pub fn for_user(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.map(String::from);
        self
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send `prompt` as a single user message and return the reply text
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String>;
}

/// OpenAI chat completions. Credentials are read by the `openai` crate from
/// `OPENAI_KEY` / `OPENAI_BASE_URL`, which the bot binary sets from config.
#[derive(Clone)]
pub struct OpenAiClient {
    model: String,
    usage_tracker: Option<UsageTracker>,
}

impl OpenAiClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            usage_tracker: None,
        }
    }

    pub fn with_usage_tracker(mut self, usage_tracker: UsageTracker) -> Self {
        self.usage_tracker = Some(usage_tracker);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let completion = ChatCompletion::builder(
            &self.model,
            vec![ChatCompletionMessage {
                role: ChatCompletionMessageRole::User,
                content: Some(prompt.to_string()),
                name: None,
                function_call: None,
                tool_call_id: None,
                tool_calls: None,
            }],
        )
        .temperature(options.temperature)
        .max_tokens(u64::from(options.max_tokens))
        .create()
        .await?;

        if let (Some(usage), Some(tracker)) = (&completion.usage, &self.usage_tracker) {
            tracker.log_chat(
                &self.model,
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens,
                options.user_id.as_deref().unwrap_or("system"),
                options.cost_bucket,
            );
        }

        let content = completion
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("Completion returned no content"))?;

        debug!(
            "Completion for {} returned {} chars",
            options.cost_bucket.as_str(),
            content.len()
        );
        Ok(content)
    }
}
