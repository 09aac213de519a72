//! Short reply suggestions for messages no intent matched.

use log::warn;
use serde_json::Value;

use super::llm::{CompletionClient, CompletionOptions};
use crate::features::analytics::CostBucket;

const MAX_REPLIES: usize = 3;
const MAX_REPLY_CHARS: usize = 50;

pub const FALLBACK_REPLIES: [&str; 3] = ["Got it!", "Thanks!", "Will do"];

fn fallback() -> Vec<String> {
    FALLBACK_REPLIES.iter().map(|r| r.to_string()).collect()
}

fn build_prompt(message: &str) -> String {
    format!(
        r#"You are a helpful assistant that suggests quick reply options for WhatsApp messages. Given the following message, suggest 1-3 short, friendly, and concise reply options (each under 50 characters).

Message: "{message}"

Respond with a JSON array of strings:
["reply option 1", "reply option 2", "reply option 3"]

Only respond with valid JSON array, no other text."#
    )
}

fn parse_reply(reply: &str) -> Option<Vec<String>> {
    match serde_json::from_str::<Value>(reply.trim()).ok()? {
        Value::Array(items) => {
            let replies: Vec<String> = items
                .into_iter()
                .take(MAX_REPLIES)
                .filter_map(|item| item.as_str().map(String::from))
                .filter(|r| r.chars().count() <= MAX_REPLY_CHARS)
                .collect();
            (!replies.is_empty()).then_some(replies)
        }
        _ => None,
    }
}

/// Suggest 1-3 replies to `message`; the fixed fallback set when no client is
/// configured or the completion is unusable
pub async fn generate_quick_replies(
    client: Option<&dyn CompletionClient>,
    message: &str,
    user_id: Option<&str>,
) -> Vec<String> {
    let Some(client) = client else {
        return fallback();
    };

    let options = CompletionOptions::new(0.8, 150, CostBucket::QuickReply).for_user(user_id);
    match client.complete(&build_prompt(message), &options).await {
        Ok(reply) => parse_reply(&reply).unwrap_or_else(fallback),
        Err(e) => {
            warn!("Quick reply generation failed: {e:#}");
            fallback()
        }
    }
}
