//! Intent model shared by the rule tier, the LLM tier and the conversation glue
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.1.0: Recurrence end and reserved QUICK_REPLY / ASK intents
//! - 1.0.0: Initial release

use chrono::{DateTime, Datelike, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The action a message expresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentType {
    Reminder,
    Snooze,
    Cancel,
    Summarize,
    /// Reserved; produced only by the LLM tier
    QuickReply,
    /// Reserved; produced only by the LLM tier
    Ask,
    OptIn,
    OptOut,
    Unknown,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Reminder => "REMINDER",
            IntentType::Snooze => "SNOOZE",
            IntentType::Cancel => "CANCEL",
            IntentType::Summarize => "SUMMARIZE",
            IntentType::QuickReply => "QUICK_REPLY",
            IntentType::Ask => "ASK",
            IntentType::OptIn => "OPT_IN",
            IntentType::OptOut => "OPT_OUT",
            IntentType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "REMINDER" => Ok(IntentType::Reminder),
            "SNOOZE" => Ok(IntentType::Snooze),
            "CANCEL" => Ok(IntentType::Cancel),
            "SUMMARIZE" => Ok(IntentType::Summarize),
            "QUICK_REPLY" => Ok(IntentType::QuickReply),
            "ASK" => Ok(IntentType::Ask),
            "OPT_IN" => Ok(IntentType::OptIn),
            "OPT_OUT" => Ok(IntentType::OptOut),
            "UNKNOWN" => Ok(IntentType::Unknown),
            other => Err(anyhow::anyhow!("Unknown intent type: {other}")),
        }
    }
}

/// Stored timestamps are RFC 3339 text, which only reads back four-digit years
pub const MAX_SCHEDULABLE_YEAR: i32 = 9999;

/// Whether a reminder may be scheduled at `at`
pub fn is_schedulable(at: DateTime<Utc>) -> bool {
    at.year() <= MAX_SCHEDULABLE_YEAR
}

/// `now + minutes`, or `None` when that falls outside the schedulable range
pub fn schedulable_after(now: DateTime<Utc>, minutes: u32) -> Option<DateTime<Utc>> {
    now.checked_add_signed(Duration::minutes(i64::from(minutes)))
        .filter(|at| is_schedulable(*at))
}

/// Cadence of a recurring reminder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::Daily => "DAILY",
            Recurrence::Weekly => "WEEKLY",
            Recurrence::Monthly => "MONTHLY",
        }
    }

    /// Next occurrence one unit after `from`.
    ///
    /// Monthly steps clamp to the last day of a shorter month (Jan 31 -> Feb 28).
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Recurrence::Daily => from + Duration::days(1),
            Recurrence::Weekly => from + Duration::weeks(1),
            Recurrence::Monthly => from
                .checked_add_months(Months::new(1))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recurrence {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            "monthly" => Ok(Recurrence::Monthly),
            other => Err(anyhow::anyhow!("Invalid recurrence: {other}")),
        }
    }
}

/// Slots extracted for an intent; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snooze_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence_end: Option<DateTime<Utc>>,
    /// Free-form question for ASK
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// A classified message; immutable once produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    #[serde(rename = "type")]
    pub kind: IntentType,
    pub confidence: f32,
    pub data: IntentData,
}

impl ParsedIntent {
    pub fn new(kind: IntentType, confidence: f32, data: IntentData) -> Self {
        Self {
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            data,
        }
    }

    /// Intent with no slots
    pub fn bare(kind: IntentType, confidence: f32) -> Self {
        Self::new(kind, confidence, IntentData::default())
    }

    /// The "nothing matched" result
    pub fn unknown() -> Self {
        Self::bare(IntentType::Unknown, 0.1)
    }
}

/// Optional caller context passed through the parser
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
}

impl ParseContext {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            thread_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_schedulable_range_ends_at_year_9999() {
        let last = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        assert!(is_schedulable(last));
        assert!(!is_schedulable(last + Duration::seconds(1)));

        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(schedulable_after(now, 30), Some(now + Duration::minutes(30)));
        assert_eq!(schedulable_after(now, u32::MAX), None);
    }

    #[test]
    fn test_intent_type_parse() {
        assert_eq!("reminder".parse::<IntentType>().unwrap(), IntentType::Reminder);
        assert_eq!("QUICK_REPLY".parse::<IntentType>().unwrap(), IntentType::QuickReply);
        assert_eq!("opt_out".parse::<IntentType>().unwrap(), IntentType::OptOut);
        assert!("DANCE".parse::<IntentType>().is_err());
    }

    #[test]
    fn test_intent_serializes_with_wire_names() {
        let intent = ParsedIntent::new(
            IntentType::Snooze,
            0.9,
            IntentData {
                snooze_minutes: Some(30),
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["type"], "SNOOZE");
        assert_eq!(json["data"]["snoozeMinutes"], 30);
        assert!(json["data"].get("subject").is_none());
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(ParsedIntent::bare(IntentType::Ask, 1.7).confidence, 1.0);
        assert_eq!(ParsedIntent::bare(IntentType::Ask, -0.2).confidence, 0.0);
    }

    #[test]
    fn test_recurrence_advance() {
        let base = Utc.with_ymd_and_hms(2025, 1, 31, 9, 0, 0).unwrap();
        assert_eq!(
            Recurrence::Daily.advance(base),
            Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap()
        );
        assert_eq!(
            Recurrence::Weekly.advance(base),
            Utc.with_ymd_and_hms(2025, 2, 7, 9, 0, 0).unwrap()
        );
        assert_eq!(
            Recurrence::Monthly.advance(base),
            Utc.with_ymd_and_hms(2025, 2, 28, 9, 0, 0).unwrap()
        );
    }
}
