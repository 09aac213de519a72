//! # Intent Parser
//!
//! Single entry point for classifying an inbound message. Runs an ordered
//! cascade of tiers (rules first, LLM last) and never fails: any tier error
//! degrades to UNKNOWN.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.2.0: Tiers generalized behind `IntentStrategy`
//! - 1.1.0: LLM fallback below the confidence threshold
//! - 1.0.0: Rules only

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::sync::Arc;

use super::llm_fallback::LlmFallback;
use super::rules::RuleMatcher;
use super::types::{ParseContext, ParsedIntent};
use crate::features::assistant::CompletionClient;

/// Rule results at or above this confidence skip the LLM tier
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.8;

/// One classification tier
#[async_trait]
pub trait IntentStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(
        &self,
        text: &str,
        context: &ParseContext,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ParsedIntent>;
}

#[derive(Clone)]
pub struct IntentParser {
    tiers: Vec<Arc<dyn IntentStrategy>>,
    threshold: f32,
}

impl IntentParser {
    pub fn new(threshold: f32) -> Self {
        Self {
            tiers: Vec::new(),
            threshold,
        }
    }

    /// Append a tier; tiers run in insertion order
    pub fn with_tier(mut self, tier: Arc<dyn IntentStrategy>) -> Self {
        self.tiers.push(tier);
        self
    }

    /// Rule tier, plus the LLM tier when a completion client is available
    pub fn hybrid(
        rules: RuleMatcher,
        llm: Option<Arc<dyn CompletionClient>>,
        threshold: f32,
    ) -> Self {
        let parser = Self::new(threshold).with_tier(Arc::new(rules));
        match llm {
            Some(client) => parser.with_tier(Arc::new(LlmFallback::new(client))),
            None => parser,
        }
    }

    pub async fn parse(&self, text: &str, context: Option<&ParseContext>) -> ParsedIntent {
        self.parse_at(text, context, Utc::now()).await
    }

    /// Parse relative to an explicit `now`
    pub async fn parse_at(
        &self,
        text: &str,
        context: Option<&ParseContext>,
        now: DateTime<Utc>,
    ) -> ParsedIntent {
        let default_context = ParseContext::default();
        let context = context.unwrap_or(&default_context);
        let last = self.tiers.len().saturating_sub(1);

        for (index, tier) in self.tiers.iter().enumerate() {
            let intent = match tier.classify(text, context, now).await {
                Ok(intent) => intent,
                Err(e) => {
                    warn!(
                        "Intent tier {} failed for user {:?}: {e}",
                        tier.name(),
                        context.user_id
                    );
                    ParsedIntent::unknown()
                }
            };

            if index == last || intent.confidence >= self.threshold {
                debug!(
                    "Intent {} ({:.2}) from tier {}",
                    intent.kind,
                    intent.confidence,
                    tier.name()
                );
                return intent;
            }

            debug!(
                "Tier {} below threshold ({:.2} < {:.2}), trying next",
                tier.name(),
                intent.confidence,
                self.threshold
            );
        }

        ParsedIntent::unknown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::assistant::CompletionOptions;
    use crate::features::intent::types::IntentType;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Completion client returning a fixed reply and counting calls
    struct ScriptedClient {
        reply: anyhow::Result<String>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(anyhow::anyhow!("connection refused")),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 20, 0, 0).unwrap()
    }

    fn parser_with(client: Arc<ScriptedClient>) -> IntentParser {
        IntentParser::hybrid(RuleMatcher::default(), Some(client), DEFAULT_CONFIDENCE_THRESHOLD)
    }

    #[tokio::test]
    async fn test_confident_rules_never_call_llm() {
        let client = ScriptedClient::replying(r#"{"type": "UNKNOWN", "confidence": 1.0}"#);
        let parser = parser_with(client.clone());

        let inputs = [
            "YES",
            "stop",
            "Cancel my reminder about rent",
            "Snooze this for 30 minutes",
            "/remind 2025-12-01 18:00 Pay rent",
            "tldr",
        ];
        for text in inputs {
            let intent = parser.parse_at(text, None, now()).await;
            assert!(intent.confidence >= DEFAULT_CONFIDENCE_THRESHOLD, "{text}");
        }
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_text_uses_llm() {
        let client = ScriptedClient::replying(
            r#"{"type": "REMINDER", "confidence": 0.9, "data": {"subject": "water plants", "scheduledFor": "2025-01-03T08:00:00Z"}}"#,
        );
        let parser = parser_with(client.clone());

        let intent = parser
            .parse_at("water the plants on friday morning", Some(&ParseContext::for_user("u1")), now())
            .await;
        assert_eq!(client.calls(), 1);
        assert_eq!(intent.kind, IntentType::Reminder);
        assert_eq!(intent.data.subject.as_deref(), Some("water plants"));
    }

    #[tokio::test]
    async fn test_generic_template_is_refined_by_llm() {
        let client = ScriptedClient::replying(
            r#"{"type": "REMINDER", "confidence": 0.95, "data": {"subject": "buy milk", "scheduledFor": "2025-01-02T09:00:00Z"}}"#,
        );
        let parser = parser_with(client.clone());
        let intent = parser.parse_at("Remind me to buy milk tomorrow", None, now()).await;
        assert_eq!(client.calls(), 1);
        assert_eq!(intent.confidence, 0.95);
    }

    #[tokio::test]
    async fn test_llm_failure_yields_unknown() {
        let parser = parser_with(ScriptedClient::failing());
        let intent = parser.parse_at("hmm what now", None, now()).await;
        assert_eq!(intent, ParsedIntent::unknown());
    }

    #[tokio::test]
    async fn test_invalid_json_yields_unknown() {
        let parser = parser_with(ScriptedClient::replying("I think this is a reminder"));
        let intent = parser.parse_at("hmm what now", None, now()).await;
        assert_eq!(intent, ParsedIntent::unknown());
    }

    #[tokio::test]
    async fn test_rules_only_returns_low_confidence_result() {
        let parser = IntentParser::hybrid(RuleMatcher::default(), None, DEFAULT_CONFIDENCE_THRESHOLD);
        let intent = parser.parse_at("Remind me to buy milk tomorrow", None, now()).await;
        assert_eq!(intent.kind, IntentType::Reminder);
        assert!(intent.confidence < DEFAULT_CONFIDENCE_THRESHOLD);

        let unknown = parser.parse_at("lovely weather", None, now()).await;
        assert_eq!(unknown, ParsedIntent::unknown());
    }

    #[tokio::test]
    async fn test_empty_parser_is_unknown() {
        let parser = IntentParser::new(DEFAULT_CONFIDENCE_THRESHOLD);
        assert_eq!(parser.parse("anything", None).await, ParsedIntent::unknown());
    }
}
