//! Periodic purge of expired messages and idle rate-limit entries.

use chrono::Utc;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::database::Database;
use crate::rate_limiter::RateLimiter;

pub const RETENTION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// One purge pass; returns the number of messages deleted
pub async fn purge_once(database: &Database, rate_limiter: &RateLimiter) -> anyhow::Result<usize> {
    let purged = database.purge_expired_messages(Utc::now()).await?;
    let pruned = rate_limiter.prune_idle();
    if purged > 0 || pruned > 0 {
        info!("Retention: purged {purged} expired messages, pruned {pruned} idle senders");
    }
    Ok(purged)
}

/// Run `purge_once` every `interval` until `shutdown` fires
pub fn spawn_retention_loop(
    database: Database,
    rate_limiter: Arc<RateLimiter>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = purge_once(&database, &rate_limiter).await {
                        error!("Retention purge failed: {e:#}");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MessageDirection;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_purge_removes_only_expired() {
        let db = Database::in_memory().unwrap();
        let user = db.get_or_create_user("+1555", "+1555").await.unwrap();
        db.store_message(
            &user.id,
            MessageDirection::Inbound,
            "old",
            None,
            Utc::now() - ChronoDuration::minutes(1),
        )
        .await
        .unwrap();
        db.store_message(
            &user.id,
            MessageDirection::Inbound,
            "fresh",
            None,
            Utc::now() + ChronoDuration::days(30),
        )
        .await
        .unwrap();

        let purged = purge_once(&db, &RateLimiter::per_minute(10)).await.unwrap();
        assert_eq!(purged, 1);
        let left = db.recent_messages(&user.id, 10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].body, "fresh");
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let db = Database::in_memory().unwrap();
        let shutdown = CancellationToken::new();
        let handle = spawn_retention_loop(
            db,
            Arc::new(RateLimiter::per_minute(10)),
            Duration::from_millis(10),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop exits")
            .unwrap();
    }
}
