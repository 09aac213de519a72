//! # Conversation Handler
//!
//! Turns one inbound chat message into at most one reply: consent gating,
//! intent parsing, and dispatch to the reminder lifecycle and assistant
//! helpers. Every message in either direction is stored with an expiry.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.2.0: Per-sender rate limiting, OPT_IN acknowledgement
//! - 1.1.0: Summaries and quick replies
//! - 1.0.0: Initial release

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::sync::Arc;

use crate::core::Config;
use crate::database::{Database, MessageDirection, User};
use crate::features::assistant::{generate_quick_replies, summarize_thread, CompletionClient};
use crate::features::intent::{
    is_schedulable, schedulable_after, IntentParser, IntentType, ParseContext, ParsedIntent,
};
use crate::features::reminders::{ReminderFilter, ReminderLifecycle, ReminderOptions, ReminderStore};
use crate::features::transport::{InboundMessage, OutboundMessage, SendOutcome, Transport};
use crate::rate_limiter::RateLimiter;

const EXAMPLE_REMINDER: &str = "\"Remind me tomorrow at 9am to call mom\"";
const TOO_FAR_AHEAD: &str = "That's too far in the future for me to remember. Try a date before the year 10000.";

/// Knobs the handler reads from configuration
#[derive(Debug, Clone)]
pub struct ConversationSettings {
    pub message_retention_days: i64,
    pub max_messages_per_thread: usize,
}

impl ConversationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            message_retention_days: config.message_retention_days,
            max_messages_per_thread: config.max_messages_per_thread,
        }
    }
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            message_retention_days: 30,
            max_messages_per_thread: 100,
        }
    }
}

pub struct Conversation {
    database: Database,
    parser: IntentParser,
    lifecycle: ReminderLifecycle,
    transport: Arc<dyn Transport>,
    llm: Option<Arc<dyn CompletionClient>>,
    rate_limiter: Arc<RateLimiter>,
    settings: ConversationSettings,
}

impl Conversation {
    pub fn new(
        database: Database,
        parser: IntentParser,
        lifecycle: ReminderLifecycle,
        transport: Arc<dyn Transport>,
        rate_limiter: Arc<RateLimiter>,
        settings: ConversationSettings,
    ) -> Self {
        Self {
            database,
            parser,
            lifecycle,
            transport,
            llm: None,
            rate_limiter,
            settings,
        }
    }

    /// Enable summaries and quick-reply suggestions
    pub fn with_llm(mut self, llm: Arc<dyn CompletionClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Handle one inbound message and return the reply sent, if any
    pub async fn handle_inbound(&self, inbound: InboundMessage) -> Result<Option<String>> {
        if !self.rate_limiter.check(inbound.provider, &inbound.sender) {
            warn!(
                "Rate limit exceeded for {} via {}, dropping message",
                inbound.sender,
                inbound.provider.as_str()
            );
            return Ok(None);
        }

        let user = self
            .database
            .get_or_create_user(&inbound.sender, &inbound.reply_to)
            .await?;
        let message_id = self
            .database
            .store_message(
                &user.id,
                MessageDirection::Inbound,
                &inbound.text,
                inbound.provider_message_id.as_deref(),
                self.expiry(),
            )
            .await?;

        let reply = if user.consent_given {
            let context = ParseContext::for_user(&user.id);
            let intent = self.parser.parse(&inbound.text, Some(&context)).await;
            self.database.set_message_intent(&message_id, &intent).await?;
            debug!("Message {message_id} from {} parsed as {}", user.id, intent.kind);
            self.dispatch(&user, &inbound.text, intent).await?
        } else {
            self.consent_reply(&user, &inbound.text).await?
        };

        self.send_reply(&user, &reply).await?;
        Ok(Some(reply))
    }

    async fn consent_reply(&self, user: &User, text: &str) -> Result<String> {
        if text.trim().eq_ignore_ascii_case("yes") {
            self.database.set_consent(&user.id, true).await?;
            info!("User {} opted in", user.id);
            return Ok(format!(
                "Great! I'm Boomerang, your WhatsApp assistant. I can help you:\n\n• Set reminders\n• Summarize threads\n• Quick replies\n\nTry: {EXAMPLE_REMINDER}"
            ));
        }
        Ok("Hi! I'm Boomerang. I can help you set reminders and summarize threads. Reply YES to opt in.".to_string())
    }

    async fn dispatch(&self, user: &User, text: &str, intent: ParsedIntent) -> Result<String> {
        let data = intent.data;
        match intent.kind {
            IntentType::Reminder => {
                let (Some(subject), Some(scheduled_for)) = (data.subject, data.scheduled_for) else {
                    return Ok(format!(
                        "I couldn't understand when to remind you. Try: {EXAMPLE_REMINDER}"
                    ));
                };
                if !is_schedulable(scheduled_for) {
                    warn!("Rejected reminder for user {} at {scheduled_for}", user.id);
                    return Ok(TOO_FAR_AHEAD.to_string());
                }
                self.lifecycle
                    .create(
                        &user.id,
                        &user.destination,
                        &subject,
                        scheduled_for,
                        ReminderOptions {
                            original_text: Some(text.to_string()),
                            recurrence: data.recurrence,
                            recurrence_end: data.recurrence_end,
                        },
                    )
                    .await?;
                Ok(format!(
                    "Got it! I'll remind you on {}. Reply CANCEL to remove or SNOOZE to postpone.",
                    format_confirmation_time(scheduled_for)
                ))
            }

            IntentType::Snooze => {
                let Some(minutes) = data.snooze_minutes.filter(|m| *m > 0) else {
                    return Ok("How long should I snooze? Try: \"Snooze for 30 minutes\"".to_string());
                };
                if schedulable_after(Utc::now(), minutes).is_none() {
                    return Ok(TOO_FAR_AHEAD.to_string());
                }
                let latest = self
                    .database
                    .find_pending_reminders(&ReminderFilter::for_user(&user.id).limit(1))
                    .await?;
                let snoozed = match latest.first() {
                    Some(reminder) => self.lifecycle.snooze(&reminder.id, &user.id, minutes).await?,
                    None => None,
                };
                Ok(match snoozed {
                    Some(_) => format!("Snoozed for {minutes} minutes."),
                    None => "No active reminder found to snooze.".to_string(),
                })
            }

            IntentType::Cancel => {
                let Some(subject) = data.subject.filter(|s| !s.trim().is_empty()) else {
                    warn!("Cancel from user {} named no reminder", user.id);
                    return Ok(
                        "Which reminder should I cancel? Try: \"Cancel my reminder about rent\""
                            .to_string(),
                    );
                };
                let filter = ReminderFilter::for_user(&user.id).subject_contains(subject);
                let mut cancelled = 0;
                for reminder in self.database.find_pending_reminders(&filter).await? {
                    if self.lifecycle.cancel(&reminder.id, &user.id).await? {
                        cancelled += 1;
                    }
                }
                Ok(if cancelled > 0 {
                    format!("Cancelled {cancelled} reminder(s).")
                } else {
                    "No matching reminder found to cancel.".to_string()
                })
            }

            IntentType::Summarize => {
                let messages = self
                    .database
                    .recent_messages(&user.id, self.settings.max_messages_per_thread)
                    .await?;
                if messages.is_empty() {
                    return Ok("No messages found to summarize.".to_string());
                }
                let summary = summarize_thread(self.llm.as_deref(), &messages, Some(&user.id)).await;
                Ok(summary.render())
            }

            IntentType::OptOut => {
                self.database.set_consent(&user.id, false).await?;
                info!("User {} opted out", user.id);
                Ok("You've been unsubscribed. Reply YES to opt back in.".to_string())
            }

            IntentType::OptIn => Ok(format!(
                "You're already opted in. Try: {EXAMPLE_REMINDER}"
            )),

            IntentType::QuickReply | IntentType::Ask | IntentType::Unknown => {
                let replies = generate_quick_replies(self.llm.as_deref(), text, Some(&user.id)).await;
                let bullets = replies
                    .iter()
                    .map(|r| format!("• {r}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(format!("I'm not sure how to help with that. Quick replies:\n{bullets}"))
            }
        }
    }

    async fn send_reply(&self, user: &User, body: &str) -> Result<()> {
        let provider_message_id = match self
            .transport
            .send_chunked(&OutboundMessage::new(&user.destination, body))
            .await
        {
            SendOutcome::Sent {
                provider_message_id,
            } => Some(provider_message_id),
            SendOutcome::Failed { reason } => {
                warn!("Reply to user {} failed: {reason}", user.id);
                None
            }
        };

        self.database
            .store_message(
                &user.id,
                MessageDirection::Outbound,
                body,
                provider_message_id.as_deref(),
                self.expiry(),
            )
            .await?;
        Ok(())
    }

    fn expiry(&self) -> DateTime<Utc> {
        Utc::now() + Duration::days(self.settings.message_retention_days)
    }
}

/// e.g. "Mar 4, 2026 9:05 AM UTC"
pub fn format_confirmation_time(at: DateTime<Utc>) -> String {
    at.format("%b %-d, %Y %-I:%M %p UTC").to_string()
}
