//! Reminder rows and the delay-queue job payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::features::intent::Recurrence;

/// Prefix of every reminder job key; one live job per reminder
pub const JOB_KEY_PREFIX: &str = "reminder-";

pub fn job_key(reminder_id: &str) -> String {
    format!("{JOB_KEY_PREFIX}{reminder_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderStatus {
    Pending,
    Delivered,
    Cancelled,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "PENDING",
            ReminderStatus::Delivered => "DELIVERED",
            ReminderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReminderStatus::Pending)
    }
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "PENDING" => Ok(ReminderStatus::Pending),
            "DELIVERED" => Ok(ReminderStatus::Delivered),
            "CANCELLED" => Ok(ReminderStatus::Cancelled),
            other => Err(anyhow::anyhow!("Invalid reminder status: {other}")),
        }
    }
}

/// A stored reminder. Recurrence successors are new rows, never reopened ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    pub id: String,
    pub user_id: String,
    pub subject: String,
    pub scheduled_for: DateTime<Utc>,
    pub status: ReminderStatus,
    pub is_recurring: bool,
    pub recurrence: Option<Recurrence>,
    pub recurrence_end: Option<DateTime<Utc>>,
    pub original_text: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields for a reminder about to be inserted
#[derive(Debug, Clone)]
pub struct NewReminder {
    pub user_id: String,
    pub subject: String,
    pub scheduled_for: DateTime<Utc>,
    pub original_text: Option<String>,
    pub recurrence: Option<Recurrence>,
    pub recurrence_end: Option<DateTime<Utc>>,
}

/// Everything the Delivery Handler needs besides the reminder row itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderJob {
    pub reminder_id: String,
    pub user_id: String,
    pub destination: String,
    pub subject: String,
    pub original_text: Option<String>,
    pub is_recurring: bool,
    pub recurrence: Option<Recurrence>,
}

impl ReminderJob {
    pub fn key(&self) -> String {
        job_key(&self.reminder_id)
    }
}
