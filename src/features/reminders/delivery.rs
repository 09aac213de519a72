//! # Reminder Delivery
//!
//! Job handler run by the delay queue when a reminder comes due. The PENDING
//! re-check makes stale and duplicate jobs no-ops; a transport failure is
//! returned as an error so the queue retries it.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.1.0: Dedup key on outbound messages, recurrence skipped when a cancel wins
//! - 1.0.0: Initial release

use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;
use thiserror::Error;

use super::job::{job_key, ReminderJob, ReminderStatus};
use super::lifecycle::{ReminderLifecycle, ScheduledReminder};
use super::queue::JobHandler;
use super::store::ReminderStore;
use crate::features::transport::{OutboundMessage, SendOutcome, Transport};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport failed to deliver reminder {reminder_id}: {reason}")]
    Transport { reminder_id: String, reason: String },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Reminder missing or no longer PENDING; nothing sent
    Skipped,
    Delivered {
        provider_message_id: String,
        next: Option<ScheduledReminder>,
    },
    /// Sent, but the reminder left PENDING before it could be marked delivered
    SentAfterCancel { provider_message_id: String },
}

/// Notification text for a due reminder
pub fn format_reminder_body(subject: &str, original_text: Option<&str>) -> String {
    let mut body = format!("🔔 Reminder: {subject}");
    if let Some(original) = original_text.filter(|o| !o.trim().is_empty()) {
        body.push_str(&format!("\n\nOriginal: \"{original}\""));
    }
    body.push_str("\n\nQuick actions:\n• SNOOZE 10m\n• SNOOZE 30m\n• DONE");
    body
}

pub struct ReminderDelivery {
    store: Arc<dyn ReminderStore>,
    transport: Arc<dyn Transport>,
    lifecycle: ReminderLifecycle,
}

impl ReminderDelivery {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        transport: Arc<dyn Transport>,
        lifecycle: ReminderLifecycle,
    ) -> Self {
        Self {
            store,
            transport,
            lifecycle,
        }
    }

    pub async fn deliver(&self, job: &ReminderJob) -> Result<DeliveryOutcome, DeliveryError> {
        let reminder = match self.store.get_reminder(&job.reminder_id).await? {
            Some(r) if r.status == ReminderStatus::Pending => r,
            Some(r) => {
                info!("Reminder {} is {}, skipping stale job", r.id, r.status);
                return Ok(DeliveryOutcome::Skipped);
            }
            None => {
                warn!("Reminder {} no longer exists, skipping job", job.reminder_id);
                return Ok(DeliveryOutcome::Skipped);
            }
        };

        let body = format_reminder_body(&reminder.subject, reminder.original_text.as_deref());
        let message =
            OutboundMessage::new(&job.destination, body).with_dedup_key(job_key(&reminder.id));

        let provider_message_id = match self.transport.send_chunked(&message).await {
            SendOutcome::Sent {
                provider_message_id,
            } => provider_message_id,
            SendOutcome::Failed { reason } => {
                return Err(DeliveryError::Transport {
                    reminder_id: reminder.id,
                    reason,
                })
            }
        };

        let marked = self
            .store
            .update_reminder_status(&reminder.id, None, ReminderStatus::Delivered, Utc::now())
            .await?;
        if !marked {
            warn!(
                "Reminder {} left PENDING during send; not scheduling recurrence",
                reminder.id
            );
            return Ok(DeliveryOutcome::SentAfterCancel {
                provider_message_id,
            });
        }
        info!("Delivered reminder {} ({provider_message_id})", reminder.id);

        let next = if reminder.is_recurring {
            self.lifecycle
                .schedule_next_recurrence(&reminder.id)
                .await
                .map_err(|e| {
                    error!("Reminder {} delivered but next occurrence failed: {e:#}", reminder.id);
                    e
                })?
        } else {
            None
        };

        Ok(DeliveryOutcome::Delivered {
            provider_message_id,
            next,
        })
    }
}

#[async_trait]
impl JobHandler for ReminderDelivery {
    async fn handle(&self, job: &ReminderJob) -> anyhow::Result<()> {
        self.deliver(job).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MessagingProvider;
    use crate::database::Database;
    use crate::features::intent::Recurrence;
    use crate::features::reminders::lifecycle::ReminderOptions;
    use crate::features::reminders::queue::{JobQueue, QueueOptions};
    use crate::features::reminders::store::ReminderFilter;
    use chrono::Duration;
    use std::sync::Mutex;

    struct FakeTransport {
        sent: Mutex<Vec<OutboundMessage>>,
        fail: bool,
    }

    impl FakeTransport {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn sent(&self) -> Vec<OutboundMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn id(&self) -> MessagingProvider {
            MessagingProvider::Console
        }

        async fn send(&self, message: &OutboundMessage) -> SendOutcome {
            if self.fail {
                return SendOutcome::Failed {
                    reason: "provider unavailable".to_string(),
                };
            }
            self.sent.lock().unwrap().push(message.clone());
            SendOutcome::Sent {
                provider_message_id: "wamid.42".to_string(),
            }
        }

        fn verify_webhook(&self, _body: &[u8], _signature: Option<&str>) -> bool {
            true
        }
    }

    /// Cancels the reminder mid-send, as a user replying DONE would
    struct CancellingTransport {
        lifecycle: ReminderLifecycle,
        reminder_id: String,
        user_id: String,
    }

    #[async_trait]
    impl Transport for CancellingTransport {
        fn id(&self) -> MessagingProvider {
            MessagingProvider::Console
        }

        async fn send(&self, _message: &OutboundMessage) -> SendOutcome {
            let cancelled = self
                .lifecycle
                .cancel(&self.reminder_id, &self.user_id)
                .await
                .unwrap();
            assert!(cancelled);
            SendOutcome::Sent {
                provider_message_id: "wamid.43".to_string(),
            }
        }

        fn verify_webhook(&self, _body: &[u8], _signature: Option<&str>) -> bool {
            true
        }
    }

    struct Harness {
        db: Database,
        lifecycle: ReminderLifecycle,
        user_id: String,
    }

    async fn harness() -> Harness {
        let db = Database::in_memory().unwrap();
        let user = db.get_or_create_user("+15550001111", "+15550001111").await.unwrap();
        let queue = JobQueue::new(QueueOptions::default());
        let lifecycle = ReminderLifecycle::new(Arc::new(db.clone()), queue);
        Harness {
            db,
            lifecycle,
            user_id: user.id,
        }
    }

    fn delivery(h: &Harness, transport: Arc<FakeTransport>) -> ReminderDelivery {
        ReminderDelivery::new(Arc::new(h.db.clone()), transport, h.lifecycle.clone())
    }

    fn job_for(h: &Harness, reminder_id: &str) -> ReminderJob {
        ReminderJob {
            reminder_id: reminder_id.to_string(),
            user_id: h.user_id.clone(),
            destination: "+15550001111".to_string(),
            subject: "call mom".to_string(),
            original_text: None,
            is_recurring: false,
            recurrence: None,
        }
    }

    #[test]
    fn test_body_format() {
        assert_eq!(
            format_reminder_body("call mom", Some("Remind me tomorrow at 9am to call mom")),
            "🔔 Reminder: call mom\n\nOriginal: \"Remind me tomorrow at 9am to call mom\"\n\nQuick actions:\n• SNOOZE 10m\n• SNOOZE 30m\n• DONE"
        );
        assert_eq!(
            format_reminder_body("stretch", None),
            "🔔 Reminder: stretch\n\nQuick actions:\n• SNOOZE 10m\n• SNOOZE 30m\n• DONE"
        );
    }

    #[tokio::test]
    async fn test_delivers_and_marks_delivered() {
        let h = harness().await;
        let scheduled = h
            .lifecycle
            .create(
                &h.user_id,
                "+15550001111",
                "call mom",
                Utc::now(),
                ReminderOptions {
                    original_text: Some("Remind me to call mom".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let transport = FakeTransport::new(false);

        let outcome = delivery(&h, transport.clone())
            .deliver(&job_for(&h, &scheduled.reminder_id))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                provider_message_id: "wamid.42".to_string(),
                next: None
            }
        );
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("Original: \"Remind me to call mom\""));
        assert_eq!(
            sent[0].dedup_key,
            Some(format!("reminder-{}", scheduled.reminder_id))
        );

        let row = h.db.get_reminder(&scheduled.reminder_id).await.unwrap().unwrap();
        assert_eq!(row.status, ReminderStatus::Delivered);
        assert!(row.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_job_is_noop() {
        let h = harness().await;
        let scheduled = h
            .lifecycle
            .create(&h.user_id, "+15550001111", "rent", Utc::now(), ReminderOptions::default())
            .await
            .unwrap();
        h.lifecycle.cancel(&scheduled.reminder_id, &h.user_id).await.unwrap();
        let transport = FakeTransport::new(false);
        let handler = delivery(&h, transport.clone());

        let outcome = handler.deliver(&job_for(&h, &scheduled.reminder_id)).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Skipped);

        let missing = handler.deliver(&job_for(&h, "gone")).await.unwrap();
        assert_eq!(missing, DeliveryOutcome::Skipped);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_redelivery_after_success_is_noop() {
        let h = harness().await;
        let scheduled = h
            .lifecycle
            .create(&h.user_id, "+15550001111", "rent", Utc::now(), ReminderOptions::default())
            .await
            .unwrap();
        let transport = FakeTransport::new(false);
        let handler = delivery(&h, transport.clone());
        let job = job_for(&h, &scheduled.reminder_id);

        handler.deliver(&job).await.unwrap();
        assert_eq!(handler.deliver(&job).await.unwrap(), DeliveryOutcome::Skipped);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_retryable_and_leaves_row() {
        let h = harness().await;
        let scheduled = h
            .lifecycle
            .create(&h.user_id, "+15550001111", "rent", Utc::now(), ReminderOptions::default())
            .await
            .unwrap();

        let result = delivery(&h, FakeTransport::new(true))
            .deliver(&job_for(&h, &scheduled.reminder_id))
            .await;
        assert!(matches!(result, Err(DeliveryError::Transport { .. })));

        let row = h.db.get_reminder(&scheduled.reminder_id).await.unwrap().unwrap();
        assert_eq!(row.status, ReminderStatus::Pending);
    }

    #[tokio::test]
    async fn test_recurring_delivery_schedules_next() {
        let h = harness().await;
        let scheduled_for = Utc::now() - Duration::minutes(2);
        let scheduled = h
            .lifecycle
            .create(
                &h.user_id,
                "+15550001111",
                "vitamins",
                scheduled_for,
                ReminderOptions {
                    recurrence: Some(Recurrence::Daily),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut job = job_for(&h, &scheduled.reminder_id);
        job.is_recurring = true;
        job.recurrence = Some(Recurrence::Daily);
        let outcome = delivery(&h, FakeTransport::new(false)).deliver(&job).await.unwrap();

        let DeliveryOutcome::Delivered { next: Some(next), .. } = outcome else {
            panic!("expected a next occurrence, got {outcome:?}");
        };
        let pending = h
            .db
            .find_pending_reminders(&ReminderFilter::for_user(&h.user_id))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, next.reminder_id);
        assert_eq!(
            pending[0].scheduled_for.timestamp(),
            (scheduled_for + Duration::days(1)).timestamp()
        );
    }

    #[tokio::test]
    async fn test_cancel_during_send_skips_recurrence() {
        let h = harness().await;
        let scheduled = h
            .lifecycle
            .create(
                &h.user_id,
                "+15550001111",
                "vitamins",
                Utc::now(),
                ReminderOptions {
                    recurrence: Some(Recurrence::Daily),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let transport = Arc::new(CancellingTransport {
            lifecycle: h.lifecycle.clone(),
            reminder_id: scheduled.reminder_id.clone(),
            user_id: h.user_id.clone(),
        });
        let handler =
            ReminderDelivery::new(Arc::new(h.db.clone()), transport, h.lifecycle.clone());

        let mut job = job_for(&h, &scheduled.reminder_id);
        job.is_recurring = true;
        job.recurrence = Some(Recurrence::Daily);
        let outcome = handler.deliver(&job).await.unwrap();

        assert_eq!(
            outcome,
            DeliveryOutcome::SentAfterCancel {
                provider_message_id: "wamid.43".to_string()
            }
        );
        let row = h.db.get_reminder(&scheduled.reminder_id).await.unwrap().unwrap();
        assert_eq!(row.status, ReminderStatus::Cancelled);
        let pending = h
            .db
            .find_pending_reminders(&ReminderFilter::for_user(&h.user_id))
            .await
            .unwrap();
        assert!(pending.is_empty());
    }
}
