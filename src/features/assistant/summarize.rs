//! Thread summaries with up to three action items.

use log::warn;
use serde::Deserialize;
use serde_json::Value;

use super::llm::{CompletionClient, CompletionOptions};
use crate::database::{MessageDirection, StoredMessage};
use crate::features::analytics::CostBucket;

/// Most recent messages included in a summary prompt
pub const SUMMARY_WINDOW: usize = 50;
const MAX_ACTION_ITEMS: usize = 3;

const EMPTY_THREAD: &str = "No messages to summarize.";
const MISSING_SUMMARY: &str = "Unable to generate summary.";
const UNAVAILABLE: &str = "Unable to generate summary at this time.";

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSummary {
    pub summary: String,
    pub action_items: Vec<String>,
}

impl ThreadSummary {
    fn fallback(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            action_items: Vec::new(),
        }
    }

    /// Chat-ready rendering
    pub fn render(&self) -> String {
        let items = self
            .action_items
            .iter()
            .map(|item| format!("• {item}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("📋 Summary:\n{}\n\nAction items:\n{items}", self.summary)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryReply {
    summary: Option<String>,
    action_items: Option<Value>,
}

fn build_prompt(messages: &[StoredMessage]) -> String {
    let start = messages.len().saturating_sub(SUMMARY_WINDOW);
    let transcript = messages[start..]
        .iter()
        .map(|message| {
            let speaker = match message.direction {
                MessageDirection::Inbound => "User",
                MessageDirection::Outbound => "Assistant",
            };
            format!("{speaker}: {}", message.body)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a helpful assistant that summarizes WhatsApp conversation threads. Analyze the following conversation and provide:

1. A concise 1-2 sentence summary of the main topics discussed
2. Three bullet-point action items or key takeaways

Conversation:
{transcript}

Respond with a JSON object in this exact format:
{{
  "summary": "1-2 sentence summary",
  "actionItems": ["item 1", "item 2", "item 3"]
}}

Only respond with valid JSON, no other text."#
    )
}

fn parse_reply(reply: &str) -> Option<ThreadSummary> {
    let parsed: SummaryReply = serde_json::from_str(reply.trim()).ok()?;

    let summary = parsed
        .summary
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| MISSING_SUMMARY.to_string());
    let action_items = match parsed.action_items {
        Some(Value::Array(items)) => items
            .into_iter()
            .take(MAX_ACTION_ITEMS)
            .filter_map(|item| item.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    };

    Some(ThreadSummary {
        summary,
        action_items,
    })
}

/// Summarize messages given oldest first. Never fails: an empty thread, a
/// missing client, or a bad completion all yield fallback text.
pub async fn summarize_thread(
    client: Option<&dyn CompletionClient>,
    messages: &[StoredMessage],
    user_id: Option<&str>,
) -> ThreadSummary {
    if messages.is_empty() {
        return ThreadSummary::fallback(EMPTY_THREAD);
    }
    let Some(client) = client else {
        return ThreadSummary::fallback(UNAVAILABLE);
    };

    let options = CompletionOptions::new(0.5, 300, CostBucket::Summary).for_user(user_id);
    match client.complete(&build_prompt(messages), &options).await {
        Ok(reply) => parse_reply(&reply).unwrap_or_else(|| {
            warn!("Summary reply was not valid JSON");
            ThreadSummary::fallback(UNAVAILABLE)
        }),
        Err(e) => {
            warn!("Summarization failed: {e:#}");
            ThreadSummary::fallback(UNAVAILABLE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct ScriptedClient {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(reply: Option<&str>) -> Self {
            Self {
                reply: reply.map(String::from),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
            assert_eq!(options.cost_bucket, CostBucket::Summary);
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => bail!("service unavailable"),
            }
        }
    }

    fn message(direction: MessageDirection, body: &str) -> StoredMessage {
        StoredMessage {
            id: body.to_string(),
            user_id: "u1".to_string(),
            direction,
            body: body.to_string(),
            intent_type: None,
            intent_data: None,
            provider_message_id: None,
            created_at: Utc::now(),
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_summary_parsed_and_items_capped() {
        let client = ScriptedClient::new(Some(
            r#"{"summary": "Planning the trip.", "actionItems": ["book flights", 7, "pack", "call hotel", "rent car"]}"#,
        ));
        let messages = vec![
            message(MessageDirection::Inbound, "when do we fly?"),
            message(MessageDirection::Outbound, "Friday"),
        ];

        let summary = summarize_thread(Some(&client), &messages, Some("u1")).await;

        assert_eq!(summary.summary, "Planning the trip.");
        assert_eq!(summary.action_items, vec!["book flights", "pack"]);
        let prompt = client.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("User: when do we fly?\nAssistant: Friday"));
    }

    #[tokio::test]
    async fn test_prompt_uses_last_fifty_messages() {
        let client = ScriptedClient::new(Some(r#"{"summary": "ok", "actionItems": []}"#));
        let messages: Vec<_> = (0..60)
            .map(|i| message(MessageDirection::Inbound, &format!("msg {i}")))
            .collect();

        summarize_thread(Some(&client), &messages, None).await;

        let prompt = client.prompts.lock().unwrap()[0].clone();
        assert!(!prompt.contains("msg 9\n"));
        assert!(prompt.contains("User: msg 10\n"));
        assert!(prompt.contains("User: msg 59"));
    }

    #[tokio::test]
    async fn test_fallbacks() {
        let empty = summarize_thread(None, &[], None).await;
        assert_eq!(empty.summary, "No messages to summarize.");

        let messages = vec![message(MessageDirection::Inbound, "hi")];
        let no_client = summarize_thread(None, &messages, None).await;
        assert_eq!(no_client.summary, "Unable to generate summary at this time.");

        let failing = ScriptedClient::new(None);
        let failed = summarize_thread(Some(&failing), &messages, None).await;
        assert_eq!(failed.summary, "Unable to generate summary at this time.");

        let prose = ScriptedClient::new(Some("Here is your summary!"));
        let unparsed = summarize_thread(Some(&prose), &messages, None).await;
        assert_eq!(unparsed.summary, "Unable to generate summary at this time.");
        assert!(unparsed.action_items.is_empty());

        let blank = ScriptedClient::new(Some(r#"{"actionItems": "none"}"#));
        let missing = summarize_thread(Some(&blank), &messages, None).await;
        assert_eq!(missing.summary, "Unable to generate summary.");
        assert!(missing.action_items.is_empty());
    }

    #[test]
    fn test_render() {
        let summary = ThreadSummary {
            summary: "Trip planning.".to_string(),
            action_items: vec!["book flights".to_string(), "pack".to_string()],
        };
        assert_eq!(
            summary.render(),
            "📋 Summary:\nTrip planning.\n\nAction items:\n• book flights\n• pack"
        );
    }
}
