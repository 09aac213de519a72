//! # Delay Queue
//!
//! In-process delayed job queue with keyed deduplication, bounded concurrency
//! and exponential-backoff retries. Jobs live in memory only; pending reminders
//! are re-enqueued from storage at startup.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.2.0
//!
//! ## Changelog
//! - 1.1.0: Retries with exponential backoff, cancellation of in-flight retries
//! - 1.0.0: Initial release

use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::job::ReminderJob;

/// Upper bound on how long the dispatcher sleeps with nothing due
const IDLE_POLL: Duration = Duration::from_secs(60);

#[async_trait]
pub trait DelayQueue: Send + Sync {
    /// Schedule `payload` to run after `delay`. A key that is already queued
    /// keeps its existing job and that job's id is returned.
    async fn enqueue(&self, job_key: &str, payload: ReminderJob, delay: Duration) -> Result<String>;

    /// Remove the job with this key. Returns whether one was queued or retrying.
    async fn cancel_by_key(&self, job_key: &str) -> bool;
}

/// Callback run for each due job. An error makes the job eligible for retry.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &ReminderJob) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    pub concurrency: usize,
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            attempts: 3,
            backoff: Duration::from_millis(2000),
        }
    }
}

impl QueueOptions {
    /// Delay before retry number `attempt` (1-based count of failures so far)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor)
    }
}

#[derive(Debug, Clone)]
struct QueuedJob {
    id: String,
    payload: ReminderJob,
    run_at: Instant,
    /// Attempts already made
    attempts_made: u32,
}

pub struct JobQueue {
    jobs: DashMap<String, QueuedJob>,
    /// Claimed jobs: key -> job id
    in_flight: DashMap<String, String>,
    wake: Notify,
    options: QueueOptions,
}

impl JobQueue {
    pub fn new(options: QueueOptions) -> Arc<Self> {
        Arc::new(Self {
            jobs: DashMap::new(),
            in_flight: DashMap::new(),
            wake: Notify::new(),
            options,
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains(&self, job_key: &str) -> bool {
        self.jobs.contains_key(job_key)
    }

    /// Dispatch due jobs until `shutdown` fires
    pub async fn run(self: Arc<Self>, handler: Arc<dyn JobHandler>, shutdown: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        info!(
            "Delay queue started (concurrency: {}, attempts: {}, backoff: {:?})",
            self.options.concurrency, self.options.attempts, self.options.backoff
        );

        loop {
            for (key, job) in self.claim_due(Instant::now()) {
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    permit = permits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };
                let queue = Arc::clone(&self);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    queue.execute(key, job, handler).await;
                    drop(permit);
                });
            }

            let deadline = self
                .next_run_at()
                .unwrap_or_else(|| Instant::now() + IDLE_POLL);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Delay queue stopped with {} job(s) queued", self.jobs.len());
                    return;
                }
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    /// Remove every due job from the map; removal is the claim
    fn claim_due(&self, now: Instant) -> Vec<(String, QueuedJob)> {
        let due_keys: Vec<String> = self
            .jobs
            .iter()
            .filter(|entry| entry.run_at <= now)
            .map(|entry| entry.key().clone())
            .collect();

        due_keys
            .into_iter()
            .filter_map(|key| self.jobs.remove_if(&key, |_, job| job.run_at <= now))
            .inspect(|(key, job)| {
                self.in_flight.insert(key.clone(), job.id.clone());
            })
            .collect()
    }

    fn next_run_at(&self) -> Option<Instant> {
        self.jobs.iter().map(|entry| entry.run_at).min()
    }

    async fn execute(&self, key: String, mut job: QueuedJob, handler: Arc<dyn JobHandler>) {
        job.attempts_made += 1;
        let result = handler.handle(&job.payload).await;

        let still_claimed = self
            .in_flight
            .remove_if(&key, |_, id| *id == job.id)
            .is_some();

        let e = match result {
            Ok(()) => {
                debug!("Job {key} ({}) completed", job.id);
                return;
            }
            Err(e) => e,
        };

        if job.attempts_made >= self.options.attempts {
            error!(
                "Job {key} failed after {} attempt(s), giving up: {e:#}",
                job.attempts_made
            );
            return;
        }
        if !still_claimed {
            debug!("Job {key} was cancelled during its run, not retrying");
            return;
        }

        let delay = self.options.backoff_for(job.attempts_made);
        warn!(
            "Job {key} attempt {}/{} failed: {e:#}; retrying in {delay:?}",
            job.attempts_made, self.options.attempts
        );
        job.run_at = Instant::now() + delay;

        match self.jobs.entry(key) {
            Entry::Occupied(existing) => {
                debug!("Job {} was re-enqueued meanwhile, dropping retry", existing.key());
            }
            Entry::Vacant(slot) => {
                slot.insert(job);
                self.wake.notify_one();
            }
        }
    }
}

#[async_trait]
impl DelayQueue for JobQueue {
    async fn enqueue(&self, job_key: &str, payload: ReminderJob, delay: Duration) -> Result<String> {
        let id = match self.jobs.entry(job_key.to_string()) {
            Entry::Occupied(existing) => {
                debug!("Job {job_key} already queued, keeping {}", existing.get().id);
                return Ok(existing.get().id.clone());
            }
            Entry::Vacant(slot) => {
                let id = Uuid::new_v4().to_string();
                slot.insert(QueuedJob {
                    id: id.clone(),
                    payload,
                    run_at: Instant::now() + delay,
                    attempts_made: 0,
                });
                id
            }
        };

        self.wake.notify_one();
        debug!("Enqueued job {job_key} ({id}) with delay {delay:?}");
        Ok(id)
    }

    async fn cancel_by_key(&self, job_key: &str) -> bool {
        let queued = self.jobs.remove(job_key).is_some();
        let running = self.in_flight.remove(job_key).is_some();
        if queued || running {
            debug!("Cancelled job {job_key}");
        }
        queued || running
    }
}
