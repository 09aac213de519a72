//! # LLM Fallback
//!
//! Second intent tier. Sends one fixed-schema prompt to the completion client
//! and parses the JSON reply strictly into a [`ParsedIntent`]; anything that
//! does not fit the schema is an [`IntentReplyError`].
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.2.0
//!
//! ## Changelog
//! - 1.1.0: Strict reply validation, current time included in the prompt
//! - 1.0.0: Initial release

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use super::parser::IntentStrategy;
use super::types::{IntentData, IntentType, ParseContext, ParsedIntent, Recurrence};
use crate::features::analytics::CostBucket;
use crate::features::assistant::{CompletionClient, CompletionOptions};

pub const INTENT_TEMPERATURE: f32 = 0.2;
pub const INTENT_MAX_TOKENS: u32 = 300;

/// Why an LLM reply could not be turned into an intent
#[derive(Debug, Error, PartialEq)]
pub enum IntentReplyError {
    #[error("reply is not valid JSON")]
    InvalidJson,
    #[error("reply is not a JSON object")]
    NotAnObject,
    #[error("unknown intent type: {0}")]
    UnknownType(String),
    #[error("unparseable timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("snooze minutes must be a positive integer, got {0}")]
    InvalidSnoozeMinutes(String),
}

pub struct LlmFallback {
    client: Arc<dyn CompletionClient>,
}

impl LlmFallback {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    pub fn build_prompt(text: &str, now: DateTime<Utc>) -> String {
        let now = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        format!(
            r#"You are an intent parser for a WhatsApp reminder assistant. Analyze the following message and extract the intent.

Current time (UTC): {now}

Message: "{text}"

Respond with a JSON object in this exact format:
{{
  "type": "REMINDER" | "SNOOZE" | "CANCEL" | "SUMMARIZE" | "QUICK_REPLY" | "ASK" | "UNKNOWN",
  "confidence": 0.0-1.0,
  "data": {{
    "subject": "extracted reminder subject or null",
    "scheduledFor": "ISO 8601 datetime string or null",
    "snoozeMinutes": number or null,
    "recurrenceType": "DAILY" | "WEEKLY" | "MONTHLY" or null,
    "query": "search/ask query or null"
  }}
}}

Examples:
- "Remind me tomorrow at 9am to call mom" → {{"type": "REMINDER", "confidence": 0.95, "data": {{"subject": "call mom", "scheduledFor": "2025-12-01T09:00:00Z"}}}}
- "Snooze this for 30 minutes" → {{"type": "SNOOZE", "confidence": 0.9, "data": {{"snoozeMinutes": 30}}}}
- "Cancel my reminder about rent" → {{"type": "CANCEL", "confidence": 0.9, "data": {{"subject": "rent"}}}}

Only respond with valid JSON, no other text."#
        )
    }

    /// Parse a model reply. The reply must be exactly one JSON object.
    pub fn parse_reply(reply: &str) -> Result<ParsedIntent, IntentReplyError> {
        let value: Value =
            serde_json::from_str(reply.trim()).map_err(|_| IntentReplyError::InvalidJson)?;
        let object = value.as_object().ok_or(IntentReplyError::NotAnObject)?;

        let kind = match object.get("type").and_then(Value::as_str) {
            Some(name) => name
                .parse::<IntentType>()
                .map_err(|_| IntentReplyError::UnknownType(name.to_string()))?,
            None => return Err(IntentReplyError::UnknownType("<missing>".to_string())),
        };

        let confidence = object
            .get("confidence")
            .and_then(Value::as_f64)
            .filter(|c| c.is_finite())
            .unwrap_or(0.0) as f32;

        let data = match object.get("data") {
            Some(Value::Object(fields)) => parse_data(fields)?,
            _ => IntentData::default(),
        };

        Ok(ParsedIntent::new(kind, confidence, data))
    }
}

fn parse_data(fields: &Map<String, Value>) -> Result<IntentData, IntentReplyError> {
    let snooze_minutes = match fields.get("snoozeMinutes") {
        None | Some(Value::Null) => None,
        Some(value) => match value.as_u64().filter(|m| *m > 0) {
            Some(minutes) => Some(
                u32::try_from(minutes)
                    .map_err(|_| IntentReplyError::InvalidSnoozeMinutes(value.to_string()))?,
            ),
            None => return Err(IntentReplyError::InvalidSnoozeMinutes(value.to_string())),
        },
    };

    Ok(IntentData {
        subject: string_field(fields, "subject"),
        scheduled_for: timestamp_field(fields, "scheduledFor")?,
        snooze_minutes,
        recurrence: string_field(fields, "recurrenceType").and_then(|r| r.parse::<Recurrence>().ok()),
        recurrence_end: timestamp_field(fields, "recurrenceEnd")?,
        query: string_field(fields, "query"),
    })
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(String::from)
}

fn timestamp_field(
    fields: &Map<String, Value>,
    key: &str,
) -> Result<Option<DateTime<Utc>>, IntentReplyError> {
    match string_field(fields, key) {
        Some(raw) => parse_timestamp(&raw).map(Some),
        None => Ok(None),
    }
}

/// RFC 3339, or a naive ISO datetime read as UTC
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, IntentReplyError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .map(|naive| naive.and_utc())
        .map_err(|_| IntentReplyError::InvalidTimestamp(raw.to_string()))
}

#[async_trait]
impl IntentStrategy for LlmFallback {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn classify(
        &self,
        text: &str,
        context: &ParseContext,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ParsedIntent> {
        let prompt = Self::build_prompt(text, now);
        let options = CompletionOptions::new(INTENT_TEMPERATURE, INTENT_MAX_TOKENS, CostBucket::Intent)
            .for_user(context.user_id.as_deref());
        let reply = self.client.complete(&prompt, &options).await?;
        Ok(Self::parse_reply(&reply)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_prompt_contains_message_and_time() {
        let now = Utc.with_ymd_and_hms(2025, 5, 4, 10, 30, 0).unwrap();
        let prompt = LlmFallback::build_prompt("call the bank next friday", now);
        assert!(prompt.contains(r#"Message: "call the bank next friday""#));
        assert!(prompt.contains("2025-05-04T10:30:00Z"));
        assert!(prompt.contains(r#""snoozeMinutes": 30"#));
    }

    #[test]
    fn test_parse_reminder_reply() {
        let intent = LlmFallback::parse_reply(
            r#" {"type": "REMINDER", "confidence": 0.92, "data": {"subject": "call the bank", "scheduledFor": "2025-05-09T09:00:00Z", "recurrenceType": "WEEKLY"}} "#,
        )
        .unwrap();
        assert_eq!(intent.kind, IntentType::Reminder);
        assert!((intent.confidence - 0.92).abs() < f32::EPSILON);
        assert_eq!(intent.data.subject.as_deref(), Some("call the bank"));
        assert_eq!(
            intent.data.scheduled_for,
            Some(Utc.with_ymd_and_hms(2025, 5, 9, 9, 0, 0).unwrap())
        );
        assert_eq!(intent.data.recurrence, Some(Recurrence::Weekly));
    }

    #[test]
    fn test_naive_timestamp_read_as_utc() {
        let intent = LlmFallback::parse_reply(
            r#"{"type": "REMINDER", "confidence": 0.9, "data": {"subject": "x", "scheduledFor": "2025-05-09T09:00:00"}}"#,
        )
        .unwrap();
        assert_eq!(
            intent.data.scheduled_for,
            Some(Utc.with_ymd_and_hms(2025, 5, 9, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_nulls_and_unknown_recurrence_are_ignored() {
        let intent = LlmFallback::parse_reply(
            r#"{"type": "ASK", "confidence": 0.7, "data": {"subject": null, "scheduledFor": null, "snoozeMinutes": null, "recurrenceType": "HOURLY", "query": "what is due today"}}"#,
        )
        .unwrap();
        assert_eq!(intent.kind, IntentType::Ask);
        assert_eq!(intent.data.subject, None);
        assert_eq!(intent.data.recurrence, None);
        assert_eq!(intent.data.query.as_deref(), Some("what is due today"));
    }

    #[test]
    fn test_confidence_clamped_and_defaulted() {
        let high = LlmFallback::parse_reply(r#"{"type": "SUMMARIZE", "confidence": 3}"#).unwrap();
        assert_eq!(high.confidence, 1.0);
        let missing = LlmFallback::parse_reply(r#"{"type": "SUMMARIZE"}"#).unwrap();
        assert_eq!(missing.confidence, 0.0);
    }

    #[test]
    fn test_rejected_replies() {
        assert_eq!(
            LlmFallback::parse_reply("Sure! Here is the JSON"),
            Err(IntentReplyError::InvalidJson)
        );
        assert_eq!(
            LlmFallback::parse_reply(r#"["REMINDER"]"#),
            Err(IntentReplyError::NotAnObject)
        );
        assert_eq!(
            LlmFallback::parse_reply(r#"{"type": "DANCE", "confidence": 0.9}"#),
            Err(IntentReplyError::UnknownType("DANCE".to_string()))
        );
        assert!(matches!(
            LlmFallback::parse_reply(
                r#"{"type": "REMINDER", "confidence": 0.9, "data": {"scheduledFor": "next tuesday"}}"#
            ),
            Err(IntentReplyError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            LlmFallback::parse_reply(
                r#"{"type": "SNOOZE", "confidence": 0.9, "data": {"snoozeMinutes": -5}}"#
            ),
            Err(IntentReplyError::InvalidSnoozeMinutes(_))
        ));
    }
}
