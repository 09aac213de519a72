//! # Rule Matcher
//!
//! Deterministic first tier of intent parsing. Patterns are evaluated in a fixed
//! priority order and the first structural match wins; a reminder template whose
//! slots fail validation falls through to the next template, never to the next
//! category.
//!
//! - **Version**: 1.3.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.3.0: Wall-clock phrases read in a configurable fixed offset
//! - 1.2.0: Generic "remind me to X tomorrow" template demoted below the LLM gate
//! - 1.1.0: Recurrence keywords attached to reminder templates
//! - 1.0.0: Initial release

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::parser::IntentStrategy;
use super::types::{
    is_schedulable, schedulable_after, IntentData, IntentType, ParseContext, ParsedIntent,
    Recurrence,
};

/// Confidence of consent keywords and the `/remind` directive
pub const EXACT_CONFIDENCE: f32 = 0.95;
/// Confidence of cancel, snooze and summary phrases
pub const PHRASE_CONFIDENCE: f32 = 0.9;
/// Confidence of a fully-resolved natural-language reminder
pub const TEMPLATE_CONFIDENCE: f32 = 0.85;
/// Confidence of the generic reminder template, whose time is a placeholder
pub const GUESSED_TIME_CONFIDENCE: f32 = 0.6;

static OPT_IN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:yes|yep|yeah|ok|okay|sure|i agree|accept)$").expect("valid regex")
});

static OPT_OUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:no|nope|stop|unsubscribe|cancel|opt.?out)$").expect("valid regex")
});

static CANCEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:cancel|delete|remove|stop)\s+(?:my\s+)?(?:reminder|remind)\s+(?:about|for|to)?\s*(.+)",
    )
    .expect("valid regex")
});

static SNOOZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:snooze|postpone|delay|remind\s+me\s+later)\s+(?:this\s+)?(?:for\s+)?(\d+)\s*(min|mins|minute|minutes|hour|hours|h|m)",
    )
    .expect("valid regex")
});

static EXPLICIT_DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/remind\s+(\d{4}-\d{2}-\d{2})\s+(\d{2}):(\d{2})\s+(.+)").expect("valid regex")
});

static DAY_AT_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)remind\s+me\s+(tomorrow|today)\s+(?:at\s+)?(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\s+(?:to|about|for)\s+(.+)",
    )
    .expect("valid regex")
});

static RELATIVE_OFFSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:ping|remind|alert)\s+me\s+(?:in\s+)?(\d+)\s+(hour|hours|minute|minutes|day|days|week|weeks)\s+(?:about|for|to|that)\s+(.+)",
    )
    .expect("valid regex")
});

static GENERIC_REMINDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)remind\s+me\s+(?:to|about|for)\s+(.+?)\s+(?:tomorrow|today|in\s+\d+)")
        .expect("valid regex")
});

static RECURRENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(daily|weekly|monthly)").expect("valid regex"));

static SUMMARIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:summarize|summary|tl;?dr|tldr|recap)\s*(?:this\s+)?(?:thread|chat|conversation)?$")
        .expect("valid regex")
});

/// Lowercased, trimmed form the keyword categories match against
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Subject and time extracted by a reminder template
struct ReminderSlots {
    subject: String,
    scheduled_for: DateTime<Utc>,
}

type SlotExtractor = fn(&RuleMatcher, &Captures<'_>, DateTime<Utc>) -> Option<ReminderSlots>;

/// One natural-language reminder phrasing, tried in order
struct ReminderTemplate {
    name: &'static str,
    pattern: &'static LazyLock<Regex>,
    confidence: f32,
    extract: SlotExtractor,
}

fn reminder_templates() -> [ReminderTemplate; 3] {
    [
        ReminderTemplate {
            name: "day_at_time",
            pattern: &DAY_AT_TIME_RE,
            confidence: TEMPLATE_CONFIDENCE,
            extract: RuleMatcher::extract_day_at_time,
        },
        ReminderTemplate {
            name: "relative_offset",
            pattern: &RELATIVE_OFFSET_RE,
            confidence: TEMPLATE_CONFIDENCE,
            extract: RuleMatcher::extract_relative_offset,
        },
        ReminderTemplate {
            name: "generic",
            pattern: &GENERIC_REMINDER_RE,
            confidence: GUESSED_TIME_CONFIDENCE,
            extract: RuleMatcher::extract_generic,
        },
    ]
}

/// Pattern cascade producing a [`ParsedIntent`] for every input
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    offset: FixedOffset,
}

impl Default for RuleMatcher {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

impl RuleMatcher {
    /// `offset` is the zone wall-clock phrases ("tomorrow at 9am") are read in
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Classify a message. Never fails; returns UNKNOWN (0.1) when nothing matches.
    pub fn match_message(
        &self,
        normalized: &str,
        original: &str,
        now: DateTime<Utc>,
    ) -> ParsedIntent {
        if let Some(intent) = Self::match_consent(normalized) {
            return intent;
        }
        if let Some(intent) = Self::match_cancel(normalized) {
            return intent;
        }
        if let Some(intent) = Self::match_snooze(normalized, now) {
            return intent;
        }
        if let Some(intent) = self.match_explicit_datetime(original, now) {
            return intent;
        }
        if let Some(intent) = self.match_reminder_templates(normalized, original, now) {
            return intent;
        }
        if SUMMARIZE_RE.is_match(normalized) {
            return ParsedIntent::bare(IntentType::Summarize, PHRASE_CONFIDENCE);
        }
        ParsedIntent::unknown()
    }

    fn match_consent(normalized: &str) -> Option<ParsedIntent> {
        if OPT_IN_RE.is_match(normalized) {
            return Some(ParsedIntent::bare(IntentType::OptIn, EXACT_CONFIDENCE));
        }
        if OPT_OUT_RE.is_match(normalized) {
            return Some(ParsedIntent::bare(IntentType::OptOut, EXACT_CONFIDENCE));
        }
        None
    }

    fn match_cancel(normalized: &str) -> Option<ParsedIntent> {
        let caps = CANCEL_RE.captures(normalized)?;
        let subject = non_empty(caps.get(1)?.as_str())?;
        Some(ParsedIntent::new(
            IntentType::Cancel,
            PHRASE_CONFIDENCE,
            IntentData {
                subject: Some(subject),
                ..Default::default()
            },
        ))
    }

    fn match_snooze(normalized: &str, now: DateTime<Utc>) -> Option<ParsedIntent> {
        let caps = SNOOZE_RE.captures(normalized)?;
        let amount: u32 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2)?.as_str().to_lowercase();
        let minutes = if unit.contains("hour") || unit == "h" {
            amount.checked_mul(60)?
        } else {
            amount
        };
        if minutes == 0 || schedulable_after(now, minutes).is_none() {
            return None;
        }
        Some(ParsedIntent::new(
            IntentType::Snooze,
            PHRASE_CONFIDENCE,
            IntentData {
                snooze_minutes: Some(minutes),
                ..Default::default()
            },
        ))
    }

    fn match_explicit_datetime(&self, original: &str, now: DateTime<Utc>) -> Option<ParsedIntent> {
        let caps = EXPLICIT_DATETIME_RE.captures(original)?;
        let date = NaiveDate::parse_from_str(caps.get(1)?.as_str(), "%Y-%m-%d").ok()?;
        let hour: u32 = caps.get(2)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(3)?.as_str().parse().ok()?;
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let subject = non_empty(caps.get(4)?.as_str())?;

        let scheduled_for = self.local_to_utc(date, time)?;
        if scheduled_for <= now || !is_schedulable(scheduled_for) {
            return None;
        }

        Some(ParsedIntent::new(
            IntentType::Reminder,
            EXACT_CONFIDENCE,
            IntentData {
                subject: Some(subject),
                scheduled_for: Some(scheduled_for),
                ..Default::default()
            },
        ))
    }

    fn match_reminder_templates(
        &self,
        normalized: &str,
        original: &str,
        now: DateTime<Utc>,
    ) -> Option<ParsedIntent> {
        for template in reminder_templates() {
            let Some(caps) = template.pattern.captures(original) else {
                continue;
            };
            let Some(slots) = (template.extract)(self, &caps, now) else {
                log::debug!("Reminder template {} matched but slots were invalid", template.name);
                continue;
            };
            if slots.scheduled_for <= now
                || !is_schedulable(slots.scheduled_for)
                || slots.subject.is_empty()
            {
                log::debug!("Reminder template {} resolved to an unusable time", template.name);
                continue;
            }

            return Some(ParsedIntent::new(
                IntentType::Reminder,
                template.confidence,
                IntentData {
                    subject: Some(slots.subject),
                    scheduled_for: Some(slots.scheduled_for),
                    recurrence: detect_recurrence(normalized),
                    ..Default::default()
                },
            ));
        }
        None
    }

    /// "remind me tomorrow|today at H[:MM][am|pm] to X"
    fn extract_day_at_time(
        &self,
        caps: &Captures<'_>,
        now: DateTime<Utc>,
    ) -> Option<ReminderSlots> {
        let is_tomorrow = caps.get(1)?.as_str().eq_ignore_ascii_case("tomorrow");
        let mut hour: u32 = caps.get(2)?.as_str().parse().ok()?;
        let minute: u32 = match caps.get(3) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        let meridiem = caps.get(4).map(|m| m.as_str().to_lowercase());
        let subject = non_empty(caps.get(5)?.as_str())?;

        if let Some(meridiem) = meridiem.as_deref() {
            if !(1..=12).contains(&hour) {
                return None;
            }
            if meridiem == "pm" && hour != 12 {
                hour += 12;
            } else if meridiem == "am" && hour == 12 {
                hour = 0;
            }
        }
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;

        let today = now.with_timezone(&self.offset).date_naive();
        let day = if is_tomorrow { today.succ_opt()? } else { today };
        let mut scheduled_for = self.local_to_utc(day, time)?;

        // Midnight boundary: a time already passed moves to the next day
        if scheduled_for <= now {
            scheduled_for = self.local_to_utc(day.succ_opt()?, time)?;
        }

        Some(ReminderSlots {
            subject,
            scheduled_for,
        })
    }

    /// "ping|remind|alert me in N hours|minutes|days|weeks about X"
    fn extract_relative_offset(
        &self,
        caps: &Captures<'_>,
        now: DateTime<Utc>,
    ) -> Option<ReminderSlots> {
        let amount = i64::from(caps.get(1)?.as_str().parse::<u32>().ok()?);
        let unit = caps.get(2)?.as_str().to_lowercase();
        let subject = non_empty(caps.get(3)?.as_str())?;

        let offset = if unit.starts_with("minute") {
            Duration::minutes(amount)
        } else if unit.starts_with("day") {
            Duration::days(amount)
        } else if unit.starts_with("week") {
            Duration::weeks(amount)
        } else {
            Duration::hours(amount)
        };

        Some(ReminderSlots {
            subject,
            scheduled_for: now.checked_add_signed(offset)?,
        })
    }

    /// "remind me to X tomorrow|today|in N" with a one-hour placeholder time
    fn extract_generic(&self, caps: &Captures<'_>, now: DateTime<Utc>) -> Option<ReminderSlots> {
        Some(ReminderSlots {
            subject: non_empty(caps.get(1)?.as_str())?,
            scheduled_for: now + Duration::hours(1),
        })
    }

    fn local_to_utc(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn detect_recurrence(normalized: &str) -> Option<Recurrence> {
    RECURRENCE_RE
        .captures(normalized)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[async_trait]
impl IntentStrategy for RuleMatcher {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn classify(
        &self,
        text: &str,
        _context: &ParseContext,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ParsedIntent> {
        Ok(self.match_message(&normalize(text), text, now))
    }
}
