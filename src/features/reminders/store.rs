//! Storage seam used by the lifecycle manager and the delivery handler

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::job::{NewReminder, Reminder, ReminderStatus};

/// Query for PENDING reminders
#[derive(Debug, Clone, Default)]
pub struct ReminderFilter {
    pub user_id: Option<String>,
    /// Case-insensitive substring of the subject
    pub subject_contains: Option<String>,
    pub limit: Option<usize>,
}

impl ReminderFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn subject_contains(mut self, subject: impl Into<String>) -> Self {
        self.subject_contains = Some(subject.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Insert in PENDING and return the generated id
    async fn create_reminder(&self, reminder: NewReminder) -> Result<String>;

    async fn get_reminder(&self, reminder_id: &str) -> Result<Option<Reminder>>;

    /// Move a PENDING reminder to `status`, stamping `delivered_at` or
    /// `cancelled_at` with `at`. Scoped to `owner` when given. Returns whether
    /// a row changed; a terminal row never changes.
    async fn update_reminder_status(
        &self,
        reminder_id: &str,
        owner: Option<&str>,
        status: ReminderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// PENDING reminders matching `filter`, most recently created first
    async fn find_pending_reminders(&self, filter: &ReminderFilter) -> Result<Vec<Reminder>>;

    /// Current reply address of a user
    async fn find_user_destination(&self, user_id: &str) -> Result<Option<String>>;
}
