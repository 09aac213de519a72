//! # Reminders Feature
//!
//! Reminder lifecycle (create, cancel, snooze, recur), the in-process delay
//! queue that times deliveries, and the delivery handler it invokes.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.0.0: Keyed delay queue with retries replaces the polling scheduler
//! - 1.0.0: Initial release

pub mod delivery;
pub mod job;
pub mod lifecycle;
pub mod queue;
pub mod store;

pub use delivery::{format_reminder_body, DeliveryError, DeliveryOutcome, ReminderDelivery};
pub use job::{job_key, NewReminder, Reminder, ReminderJob, ReminderStatus};
pub use lifecycle::{ReminderLifecycle, ReminderOptions, ScheduledReminder};
pub use queue::{DelayQueue, JobHandler, JobQueue, QueueOptions};
pub use store::{ReminderFilter, ReminderStore};
