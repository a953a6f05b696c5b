//! Retry scheduling
//!
//! Two paths share the `retry_count` budget on the original record.
//!
//! The automatic path runs inside the dispatcher: a transient failure with
//! budget left requeues the notification with a backoff-delayed visibility
//! time; an exhausted budget parks it as Failed with the last error noted.
//!
//! The manual path is caller-driven: it mints a fresh ticket id
//! cross-referenced to the original, bypasses any backoff or schedule, and
//! conflicts on terminal or exhausted records. The original id never
//! changes.

use courier_shared::{Notification, RetryPolicy, RetryTicket};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::queue::QueueManager;
use crate::store::NotificationStore;
use courier_shared::NotificationStatus;

/// Backoff delay before the given attempt, with optional +/-25% jitter
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.delay_for(attempt);
    if !policy.jitter {
        return base;
    }
    let factor = rand::thread_rng().gen_range(0.75..=1.25);
    let jittered = base.mul_f64(factor);
    jittered.min(Duration::from_secs(policy.max_delay_secs))
}

/// Outcome of the automatic retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Requeued with a delayed visibility time
    Requeued,
    /// Budget exhausted; record is now Failed
    Exhausted,
}

/// Retry scheduler shared by the dispatcher workers and the HTTP surface
pub struct RetryScheduler {
    store: Arc<NotificationStore>,
    queues: Arc<QueueManager>,
}

impl RetryScheduler {
    pub fn new(store: Arc<NotificationStore>, queues: Arc<QueueManager>) -> Self {
        Self { store, queues }
    }

    /// Automatic path: called by a worker after a transient failure on a
    /// record it holds in Sending.
    pub fn handle_transient_failure(&self, id: Uuid, error: &str) -> Result<RetryOutcome> {
        let current = self
            .store
            .find(id)
            .ok_or_else(|| crate::error::EngineError::not_found(format!("notification {}", id)))?;

        if current.retry_count < current.retry_policy.max_retries {
            let requeued = self.store.transition(
                id,
                NotificationStatus::Sending,
                NotificationStatus::Pending,
                |n| {
                    n.retry_count += 1;
                    n.last_error = Some(error.to_string());
                },
            )?;
            let delay = backoff_delay(&requeued.retry_policy, requeued.retry_count);
            let visible_at = chrono::Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            info!(
                notification_id = %id,
                attempt = requeued.retry_count,
                delay_ms = delay.as_millis() as u64,
                error,
                "transient failure, requeued with backoff"
            );
            self.queues
                .enqueue(requeued.channel, id, requeued.priority, Some(visible_at));
            Ok(RetryOutcome::Requeued)
        } else {
            self.store.transition(
                id,
                NotificationStatus::Sending,
                NotificationStatus::Failed,
                |n| {
                    n.last_error = Some(error.to_string());
                },
            )?;
            warn!(
                notification_id = %id,
                retries = current.retry_count,
                error,
                "retry budget exhausted, notification failed"
            );
            Ok(RetryOutcome::Exhausted)
        }
    }

    /// Manual path: count a retry against the record, requeue it for
    /// immediate dispatch, and return the ticket.
    pub fn schedule_retry(&self, id: Uuid, reason: &str) -> Result<(RetryTicket, Notification)> {
        let updated = self.store.record_manual_retry(id, reason)?;

        // Immediate visibility: a manual retry overrides backoff and any
        // original schedule.
        self.queues
            .enqueue(updated.channel, id, updated.priority, None);

        let ticket = RetryTicket {
            retry_id: Uuid::new_v4(),
            original_id: id,
            retry_config: updated.retry_policy.clone(),
        };
        info!(
            notification_id = %id,
            retry_id = %ticket.retry_id,
            attempt = updated.retry_count,
            reason,
            "manual retry scheduled"
        );
        Ok((ticket, updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_shared::{ChannelKind, Priority};
    use crate::error::EngineError;

    fn scheduler() -> (Arc<NotificationStore>, Arc<QueueManager>, RetryScheduler) {
        let store = Arc::new(NotificationStore::new());
        let queues = Arc::new(QueueManager::new());
        let scheduler = RetryScheduler::new(store.clone(), queues.clone());
        (store, queues, scheduler)
    }

    fn seed(store: &NotificationStore, status: NotificationStatus, retry_count: u32) -> Uuid {
        let n = Notification {
            id: Uuid::new_v4(),
            external_id: None,
            channel: ChannelKind::Email,
            recipient: "user@example.com".to_string(),
            subject: Some("Hi".to_string()),
            body: "Test".to_string(),
            template_id: None,
            payload: None,
            priority: Priority::Normal,
            status,
            retry_count,
            retry_policy: RetryPolicy::default(),
            scheduled_for: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_error: None,
        };
        let id = n.id;
        store.create(n).unwrap();
        id
    }

    #[test]
    fn jittered_backoff_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=5 {
            let base = policy.delay_for(attempt);
            for _ in 0..50 {
                let delay = backoff_delay(&policy, attempt);
                assert!(delay >= base.mul_f64(0.75));
                assert!(delay <= Duration::from_secs(policy.max_delay_secs));
            }
        }
    }

    #[test]
    fn transient_failure_requeues_until_exhaustion() {
        let (store, queues, scheduler) = scheduler();
        let id = seed(&store, NotificationStatus::Sending, 2);

        assert_eq!(
            scheduler.handle_transient_failure(id, "smtp 421").unwrap(),
            RetryOutcome::Requeued
        );
        let record = store.find(id).unwrap();
        assert_eq!(record.status, NotificationStatus::Pending);
        assert_eq!(record.retry_count, 3);
        assert_eq!(record.last_error.as_deref(), Some("smtp 421"));
        assert_eq!(queues.depth(ChannelKind::Email), 1);
    }

    #[test]
    fn exhausted_budget_fails_the_record() {
        let (store, queues, scheduler) = scheduler();
        let id = seed(&store, NotificationStatus::Sending, 3);

        assert_eq!(
            scheduler.handle_transient_failure(id, "still down").unwrap(),
            RetryOutcome::Exhausted
        );
        let record = store.find(id).unwrap();
        assert_eq!(record.status, NotificationStatus::Failed);
        assert_eq!(record.retry_count, 3);
        assert_eq!(queues.depth(ChannelKind::Email), 0);
    }

    #[test]
    fn manual_retry_mints_a_ticket_for_the_original() {
        let (store, queues, scheduler) = scheduler();
        let id = seed(&store, NotificationStatus::Failed, 1);

        let (ticket, record) = scheduler.schedule_retry(id, "operator request").unwrap();
        assert_eq!(ticket.original_id, id);
        assert_ne!(ticket.retry_id, id);
        assert_eq!(ticket.retry_config.max_retries, 3);
        assert_eq!(record.status, NotificationStatus::Pending);
        assert_eq!(record.retry_count, 2);
        assert_eq!(queues.depth(ChannelKind::Email), 1);
    }

    #[test]
    fn manual_retry_on_terminal_conflicts() {
        let (store, _, scheduler) = scheduler();
        for status in [
            NotificationStatus::Sent,
            NotificationStatus::Delivered,
            NotificationStatus::Cancelled,
        ] {
            let id = seed(&store, status, 0);
            assert!(matches!(
                scheduler.schedule_retry(id, "nope"),
                Err(EngineError::Conflict { .. })
            ));
        }
    }

    #[test]
    fn manual_retry_on_exhausted_conflicts() {
        let (store, _, scheduler) = scheduler();
        let id = seed(&store, NotificationStatus::Failed, 3);
        assert!(matches!(
            scheduler.schedule_retry(id, "again"),
            Err(EngineError::Conflict { .. })
        ));
    }

    #[test]
    fn manual_retry_on_unknown_id_is_not_found() {
        let (_, _, scheduler) = scheduler();
        assert!(matches!(
            scheduler.schedule_retry(Uuid::new_v4(), "ghost"),
            Err(EngineError::NotFound { .. })
        ));
    }
}
