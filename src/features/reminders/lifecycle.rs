//! # Reminder Lifecycle
//!
//! Owns every status transition of a reminder: create, cancel, snooze and
//! recurrence. Rows are written before their job is enqueued so a job firing
//! early always finds its row.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.2.0: Startup recovery of pending reminders
//! - 1.1.0: Conditional status writes, snooze and recurrence
//! - 1.0.0: Initial release

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;

use super::job::{job_key, NewReminder, Reminder, ReminderJob, ReminderStatus};
use super::queue::DelayQueue;
use super::store::{ReminderFilter, ReminderStore};
use crate::features::intent::{is_schedulable, schedulable_after, Recurrence};

/// Ids of a freshly scheduled reminder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledReminder {
    pub reminder_id: String,
    pub job_id: String,
}

/// Optional fields carried by a reminder and its successors
#[derive(Debug, Clone, Default)]
pub struct ReminderOptions {
    pub original_text: Option<String>,
    pub recurrence: Option<Recurrence>,
    pub recurrence_end: Option<DateTime<Utc>>,
}

impl ReminderOptions {
    fn carried_from(reminder: &Reminder) -> Self {
        Self {
            original_text: reminder.original_text.clone(),
            recurrence: reminder.recurrence,
            recurrence_end: reminder.recurrence_end,
        }
    }
}

#[derive(Clone)]
pub struct ReminderLifecycle {
    store: Arc<dyn ReminderStore>,
    queue: Arc<dyn DelayQueue>,
}

impl ReminderLifecycle {
    pub fn new(store: Arc<dyn ReminderStore>, queue: Arc<dyn DelayQueue>) -> Self {
        Self { store, queue }
    }

    pub async fn create(
        &self,
        user_id: &str,
        destination: &str,
        subject: &str,
        scheduled_for: DateTime<Utc>,
        options: ReminderOptions,
    ) -> Result<ScheduledReminder> {
        let subject = subject.trim();
        if subject.is_empty() {
            bail!("Reminder subject must not be empty");
        }
        if !is_schedulable(scheduled_for) {
            bail!("Reminder time {scheduled_for} is past the schedulable range");
        }

        let reminder_id = self
            .store
            .create_reminder(NewReminder {
                user_id: user_id.to_string(),
                subject: subject.to_string(),
                scheduled_for,
                original_text: options.original_text.clone(),
                recurrence: options.recurrence,
                recurrence_end: options.recurrence_end,
            })
            .await
            .context("Failed to store reminder")?;

        let job = ReminderJob {
            reminder_id: reminder_id.clone(),
            user_id: user_id.to_string(),
            destination: destination.to_string(),
            subject: subject.to_string(),
            original_text: options.original_text,
            is_recurring: options.recurrence.is_some(),
            recurrence: options.recurrence,
        };
        let job_id = self.schedule(job, scheduled_for).await?;

        info!("Created reminder {reminder_id} for user {user_id} at {scheduled_for}");
        Ok(ScheduledReminder {
            reminder_id,
            job_id,
        })
    }

    /// Cancel a PENDING reminder owned by `user_id`. False for unknown, foreign
    /// or already-terminal reminders.
    pub async fn cancel(&self, reminder_id: &str, user_id: &str) -> Result<bool> {
        let changed = self
            .store
            .update_reminder_status(
                reminder_id,
                Some(user_id),
                ReminderStatus::Cancelled,
                Utc::now(),
            )
            .await?;
        if !changed {
            debug!("Cancel of reminder {reminder_id} by {user_id} was a no-op");
            return Ok(false);
        }

        self.queue.cancel_by_key(&job_key(reminder_id)).await;
        info!("Cancelled reminder {reminder_id}");
        Ok(true)
    }

    /// Replace a PENDING reminder with a copy due `minutes` from now
    pub async fn snooze(
        &self,
        reminder_id: &str,
        user_id: &str,
        minutes: u32,
    ) -> Result<Option<ScheduledReminder>> {
        if minutes == 0 {
            bail!("Snooze duration must be positive");
        }
        let Some(scheduled_for) = schedulable_after(Utc::now(), minutes) else {
            bail!("Snooze of {minutes} minutes is past the schedulable range");
        };

        let source = match self.store.get_reminder(reminder_id).await? {
            Some(r) if r.user_id == user_id && r.status == ReminderStatus::Pending => r,
            _ => return Ok(None),
        };
        let Some(destination) = self.store.find_user_destination(user_id).await? else {
            warn!("Cannot snooze reminder {reminder_id}: user {user_id} has no destination");
            return Ok(None);
        };

        if !self.cancel(reminder_id, user_id).await? {
            debug!("Reminder {reminder_id} left PENDING before snooze could cancel it");
            return Ok(None);
        }

        let snoozed = self
            .create(
                user_id,
                &destination,
                &source.subject,
                scheduled_for,
                ReminderOptions::carried_from(&source),
            )
            .await?;

        info!(
            "Snoozed reminder {reminder_id} for {minutes}m as {}",
            snoozed.reminder_id
        );
        Ok(Some(snoozed))
    }

    /// Create the successor of a delivered recurring reminder, one cadence
    /// unit after its scheduled time
    pub async fn schedule_next_recurrence(
        &self,
        reminder_id: &str,
    ) -> Result<Option<ScheduledReminder>> {
        let Some(reminder) = self.store.get_reminder(reminder_id).await? else {
            return Ok(None);
        };
        let Some(recurrence) = reminder.recurrence.filter(|_| reminder.is_recurring) else {
            return Ok(None);
        };

        let now = Utc::now();
        if let Some(end) = reminder.recurrence_end {
            if end <= now {
                info!("Recurrence of reminder {reminder_id} ended at {end}");
                return Ok(None);
            }
        }

        let Some(destination) = self.store.find_user_destination(&reminder.user_id).await? else {
            warn!(
                "Cannot recur reminder {reminder_id}: user {} has no destination",
                reminder.user_id
            );
            return Ok(None);
        };

        let next_at = recurrence.advance(reminder.scheduled_for);
        if !is_schedulable(next_at) {
            info!("Recurrence of reminder {reminder_id} reached the end of the schedulable range");
            return Ok(None);
        }
        let next = self
            .create(
                &reminder.user_id,
                &destination,
                &reminder.subject,
                next_at,
                ReminderOptions::carried_from(&reminder),
            )
            .await?;

        info!(
            "Scheduled {} occurrence {} of reminder {reminder_id} at {next_at}",
            recurrence, next.reminder_id
        );
        Ok(Some(next))
    }

    /// Enqueue a job for every PENDING reminder. Returns how many were enqueued.
    pub async fn recover_pending(&self) -> Result<usize> {
        let pending = self
            .store
            .find_pending_reminders(&ReminderFilter::default())
            .await?;

        let mut recovered = 0;
        for reminder in pending {
            let Some(destination) = self.store.find_user_destination(&reminder.user_id).await?
            else {
                warn!("Skipping recovery of reminder {}: no destination", reminder.id);
                continue;
            };
            let job = ReminderJob {
                reminder_id: reminder.id.clone(),
                user_id: reminder.user_id.clone(),
                destination,
                subject: reminder.subject.clone(),
                original_text: reminder.original_text.clone(),
                is_recurring: reminder.is_recurring,
                recurrence: reminder.recurrence,
            };
            self.schedule(job, reminder.scheduled_for).await?;
            recovered += 1;
        }

        if recovered > 0 {
            info!("Recovered {recovered} pending reminder(s)");
        }
        Ok(recovered)
    }

    async fn schedule(&self, job: ReminderJob, scheduled_for: DateTime<Utc>) -> Result<String> {
        let delay = (scheduled_for - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let key = job.key();
        self.queue
            .enqueue(&key, job, delay)
            .await
            .with_context(|| format!("Failed to enqueue {key}"))
    }
}
