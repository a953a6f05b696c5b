//! The notification service: accept path, worker pools, shutdown
//!
//! `NotificationService` is constructed once at startup and injected into the
//! HTTP layer through axum state; there is no global accessor. The accept
//! path sanitizes, records and enqueues; per-channel worker tasks own the
//! delivery loop (status CAS, breaker admission, timed adapter send, retry
//! or completion). Callers that want the first attempt's outcome await a
//! per-notification watch channel with a bounded timeout instead of polling
//! the store.

use chrono::Utc;
use courier_shared::{
    BatchResult, ChannelKind, Notification, NotificationStatus, Priority, SendResponse,
};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::channels::{ChannelAdapter, EmailAdapter, SendError, SmsAdapter, WhatsAppAdapter};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::metrics::EngineMetrics;
use crate::queue::QueueManager;
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::retry::{RetryOutcome, RetryScheduler};
use crate::sanitize::{RawMessage, Sanitizer};
use crate::store::NotificationStore;

/// Identity of the caller submitting a request, used for rate limiting
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub identity: String,
}

impl CallerContext {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

/// Normalized accept-path input, produced by the handlers from the
/// channel-specific request DTOs
#[derive(Debug, Clone)]
pub struct AcceptRequest {
    pub channel: ChannelKind,
    pub to: String,
    pub subject: Option<String>,
    pub content: String,
    pub template_id: Option<String>,
    pub payload: Option<Value>,
    pub priority: Priority,
    pub scheduled_for: Option<chrono::DateTime<Utc>>,
}

/// Outcome of the first delivery attempt, published on the completion channel
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Sent { external_id: String, latency: Duration },
    Retrying { error: String },
    Failed { error: String },
}

/// A freshly accepted notification plus its completion receiver
pub struct Accepted {
    pub notification: Notification,
    pub sanitized_content: Option<String>,
    pub sanitized_recipient: Option<String>,
    outcome_rx: watch::Receiver<Option<AttemptOutcome>>,
}

/// The delivery engine
pub struct NotificationService {
    config: EngineConfig,
    store: Arc<NotificationStore>,
    queues: Arc<QueueManager>,
    breakers: HashMap<ChannelKind, Arc<CircuitBreaker>>,
    adapters: HashMap<ChannelKind, Arc<dyn ChannelAdapter>>,
    retry: RetryScheduler,
    metrics: Arc<EngineMetrics>,
    rate_limiter: RateLimiter,
    sanitizer: Sanitizer,
    completions: DashMap<Uuid, watch::Sender<Option<AttemptOutcome>>>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
}

impl NotificationService {
    /// Build the engine with the stock adapters
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        let adapters: Vec<Arc<dyn ChannelAdapter>> = vec![
            Arc::new(EmailAdapter::new()),
            Arc::new(SmsAdapter::new()),
            Arc::new(WhatsAppAdapter::new()),
        ];
        Self::with_adapters(config, adapters)
    }

    /// Build the engine with injected adapters (one per channel)
    pub fn with_adapters(
        config: EngineConfig,
        adapters: Vec<Arc<dyn ChannelAdapter>>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let adapter_map: HashMap<ChannelKind, Arc<dyn ChannelAdapter>> = adapters
            .into_iter()
            .map(|adapter| (adapter.kind(), adapter))
            .collect();
        for channel in ChannelKind::ALL {
            if !adapter_map.contains_key(&channel) {
                return Err(EngineError::config(format!(
                    "no adapter registered for channel {}",
                    channel
                )));
            }
        }

        let breakers = ChannelKind::ALL
            .into_iter()
            .map(|channel| {
                (
                    channel,
                    Arc::new(CircuitBreaker::new(channel, config.breaker.clone())),
                )
            })
            .collect();

        let store = Arc::new(NotificationStore::new());
        let queues = Arc::new(QueueManager::new());
        let metrics = Arc::new(EngineMetrics::new(&config.metrics)?);

        Ok(Arc::new(Self {
            retry: RetryScheduler::new(store.clone(), queues.clone()),
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            sanitizer: Sanitizer::new(config.sanitizer.clone()),
            store,
            queues,
            breakers,
            adapters: adapter_map,
            metrics,
            completions: DashMap::new(),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
            started_at: Instant::now(),
            config,
        }))
    }

    /// Spawn the per-channel worker pools
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        for channel in ChannelKind::ALL {
            for worker_index in 0..self.config.dispatch.workers_per_channel {
                let service = Arc::clone(self);
                workers.push(tokio::spawn(async move {
                    service.worker_loop(channel, worker_index).await;
                }));
            }
        }
        info!(
            workers_per_channel = self.config.dispatch.workers_per_channel,
            "notification workers started"
        );
    }

    /// Stop accepting queue work and wait for workers to park
    pub async fn shutdown(&self) {
        info!("notification service shutting down");
        self.shutdown.cancel();
        self.queues.shutdown();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task panicked during shutdown");
            }
        }
        info!("notification workers drained");
    }

    /// Rate-limit check for one HTTP request
    pub fn check_rate(&self, caller: &CallerContext) -> Result<()> {
        match self.rate_limiter.check(&caller.identity) {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Denied {
                limit,
                retry_after_secs,
            } => Err(EngineError::RateLimited {
                limit,
                retry_after_secs,
            }),
        }
    }

    /// Sanitize, record and enqueue one notification
    pub fn accept(&self, request: AcceptRequest) -> Result<Accepted> {
        let sanitized = self.sanitizer.validate(&RawMessage {
            channel: request.channel,
            recipient: request.to.clone(),
            subject: request.subject.clone(),
            body: request.content.clone(),
        })?;

        let notification = Notification {
            id: Uuid::new_v4(),
            external_id: None,
            channel: request.channel,
            recipient: sanitized.recipient.clone(),
            subject: sanitized.subject.clone(),
            body: sanitized.body.clone(),
            template_id: request.template_id,
            payload: request.payload,
            priority: request.priority,
            status: NotificationStatus::Pending,
            retry_count: 0,
            retry_policy: self.config.retry.policy(),
            scheduled_for: request.scheduled_for,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_error: None,
        };
        self.store.create(notification.clone())?;

        let (tx, rx) = watch::channel(None);
        self.completions.insert(notification.id, tx);

        self.queues.enqueue(
            notification.channel,
            notification.id,
            notification.priority,
            notification.scheduled_for,
        );
        self.publish_queue_depths();

        debug!(
            notification_id = %notification.id,
            channel = %notification.channel,
            priority = %notification.priority,
            scheduled = notification.scheduled_for.is_some(),
            "notification accepted"
        );

        Ok(Accepted {
            sanitized_content: sanitized
                .content_modified
                .then(|| sanitized.body.clone()),
            sanitized_recipient: sanitized
                .recipient_modified
                .then(|| sanitized.recipient.clone()),
            notification,
            outcome_rx: rx,
        })
    }

    /// Accept and, unless scheduled for later, wait for the first attempt
    pub async fn send_and_wait(&self, request: AcceptRequest) -> Result<SendResponse> {
        let scheduled_ahead = request
            .scheduled_for
            .map(|at| at > Utc::now())
            .unwrap_or(false);
        let accepted = self.accept(request)?;
        let id = accepted.notification.id;

        if scheduled_ahead {
            return Ok(SendResponse {
                success: true,
                id,
                channel: accepted.notification.channel,
                priority: accepted.notification.priority,
                status: NotificationStatus::Pending,
                message: "Notification scheduled".to_string(),
                latency_ms: 0,
                sanitized_content: accepted.sanitized_content,
                sanitized_recipient: accepted.sanitized_recipient,
            });
        }

        let outcome = self
            .await_first_outcome(accepted.outcome_rx, self.config.dispatch.await_timeout())
            .await;
        let status = self
            .store
            .find(id)
            .map(|n| n.status)
            .unwrap_or(NotificationStatus::Pending);

        let (success, message, latency_ms) = match outcome {
            Some(AttemptOutcome::Sent { latency, .. }) => (
                true,
                "Notification sent successfully".to_string(),
                latency.as_millis() as u64,
            ),
            Some(AttemptOutcome::Retrying { error }) => (
                false,
                format!("Delivery failed, retry scheduled: {}", error),
                0,
            ),
            Some(AttemptOutcome::Failed { error }) => {
                (false, format!("Delivery failed: {}", error), 0)
            }
            None => (true, "Notification accepted".to_string(), 0),
        };

        Ok(SendResponse {
            success,
            id,
            channel: accepted.notification.channel,
            priority: accepted.notification.priority,
            status,
            message,
            latency_ms,
            sanitized_content: accepted.sanitized_content,
            sanitized_recipient: accepted.sanitized_recipient,
        })
    }

    /// Accept a batch with a concurrency cap; one result per input, in order
    pub async fn send_batch(&self, requests: Vec<AcceptRequest>) -> Result<Vec<BatchResult>> {
        if requests.is_empty() {
            return Err(EngineError::validation(
                "notifications",
                "batch cannot be empty",
            ));
        }
        if requests.len() > self.config.dispatch.max_batch_size {
            return Err(EngineError::validation(
                "notifications",
                format!(
                    "batch exceeds maximum size of {}",
                    self.config.dispatch.max_batch_size
                ),
            ));
        }

        let results = stream::iter(requests.into_iter().enumerate())
            .map(|(index, request)| async move {
                match self.send_and_wait(request).await {
                    Ok(response) => BatchResult {
                        index,
                        success: response.success,
                        id: Some(response.id),
                        error: (!response.success).then(|| response.message),
                    },
                    Err(e) => BatchResult {
                        index,
                        success: false,
                        id: None,
                        error: Some(e.to_string()),
                    },
                }
            })
            .buffered(self.config.dispatch.batch_concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(results)
    }

    async fn await_first_outcome(
        &self,
        mut rx: watch::Receiver<Option<AttemptOutcome>>,
        timeout: Duration,
    ) -> Option<AttemptOutcome> {
        let waited = tokio::time::timeout(timeout, async {
            loop {
                if let Some(outcome) = rx.borrow_and_update().clone() {
                    return outcome;
                }
                if rx.changed().await.is_err() {
                    return AttemptOutcome::Failed {
                        error: "dispatcher dropped the attempt".to_string(),
                    };
                }
            }
        })
        .await;
        waited.ok()
    }

    fn complete(&self, id: Uuid, outcome: AttemptOutcome) {
        if let Some((_, tx)) = self.completions.remove(&id) {
            let _ = tx.send(Some(outcome));
        }
    }

    /// Cancel a notification that has not been dispatched yet
    pub fn cancel(&self, id: Uuid, reason: Option<&str>) -> Result<Notification> {
        // The status CAS is the arbiter; remove the queue entry afterwards.
        let cancelled = self.store.transition(
            id,
            NotificationStatus::Pending,
            NotificationStatus::Cancelled,
            |n| {
                if let Some(reason) = reason {
                    n.last_error = Some(format!("cancelled: {}", reason));
                }
            },
        )?;
        self.queues.cancel(id);
        self.publish_queue_depths();
        self.complete(
            id,
            AttemptOutcome::Failed {
                error: "cancelled".to_string(),
            },
        );
        info!(notification_id = %id, "notification cancelled");
        Ok(cancelled)
    }

    /// Manual retry; see `RetryScheduler::schedule_retry`
    pub fn schedule_retry(&self, id: Uuid, reason: &str) -> Result<courier_shared::RetryTicket> {
        let (ticket, _) = self.retry.schedule_retry(id, reason)?;
        Ok(ticket)
    }

    pub fn find(&self, id: Uuid) -> Option<Notification> {
        self.store.find(id)
    }

    pub fn find_by_external_id(&self, external_id: &str) -> Option<Notification> {
        self.store.find_by_external_id(external_id)
    }

    pub fn list(
        &self,
        status: Option<NotificationStatus>,
        page: u32,
        limit: u32,
    ) -> (Vec<Notification>, u64) {
        self.store.list(status, page, limit)
    }

    /// Evict expired rate-limit windows; exposed for the maintenance loop
    pub fn sweep_rate_windows(&self) -> usize {
        self.rate_limiter.evict_expired()
    }

    /// Aggregate health verdict: unhealthy when a channel with pending
    /// traffic has an open breaker, degraded when the rolling error rate
    /// crosses the configured threshold.
    pub async fn health(&self) -> Value {
        let depths = self.queues.depths();
        let mut adapters = serde_json::Map::new();
        let mut blocked_channel = false;

        for channel in ChannelKind::ALL {
            let breaker_state = self.breakers[&channel].state();
            let adapter_healthy = self.adapters[&channel].health_check().await;
            let depth = depths.get(&channel).copied().unwrap_or(0);
            if breaker_state == CircuitState::Open && depth > 0 {
                blocked_channel = true;
            }
            adapters.insert(
                channel.to_string(),
                json!({
                    "healthy": adapter_healthy,
                    "circuit": breaker_state,
                    "queued": depth,
                }),
            );
        }

        let status = if blocked_channel {
            "unhealthy"
        } else if self.metrics.is_degraded() {
            "degraded"
        } else {
            "healthy"
        };

        json!({
            "status": status,
            "details": {
                "repository": {
                    "status": "ok",
                    "notifications": self.store.len(),
                },
                "queue": {
                    "status": "ok",
                    "depths": depths.iter()
                        .map(|(c, d)| (c.to_string(), *d))
                        .collect::<HashMap<_, _>>(),
                },
                "adapters": Value::Object(adapters),
            },
            "uptime_secs": self.started_at.elapsed().as_secs(),
        })
    }

    /// Operational statistics; `detailed` adds latency and error-rate data
    pub fn stats(&self, detailed: bool) -> Value {
        let snapshots = self.metrics.channel_snapshots();
        let mut channels = serde_json::Map::new();
        for channel in ChannelKind::ALL {
            let snap = &snapshots[&channel];
            channels.insert(
                channel.to_string(),
                json!({
                    "sent": snap.sent,
                    "failed": snap.failed,
                    "success_rate": snap.success_rate,
                }),
            );
        }

        let mut breakers = serde_json::Map::new();
        for channel in ChannelKind::ALL {
            let breaker = &self.breakers[&channel];
            breakers.insert(
                channel.to_string(),
                json!({
                    "state": breaker.state(),
                    "consecutive_failures": breaker.failure_count(),
                }),
            );
        }

        let mut stats = json!({
            "metrics": { "channels": Value::Object(channels) },
            "queues": self.queues.depths().iter()
                .map(|(c, d)| (c.to_string(), *d))
                .collect::<HashMap<_, _>>(),
            "circuit_breakers": Value::Object(breakers),
        });

        if detailed {
            let mut latency = serde_json::Map::new();
            for channel in ChannelKind::ALL {
                if let Some(avg) = snapshots[&channel].average_delivery_secs {
                    latency.insert(channel.to_string(), json!(avg));
                }
            }
            stats["performance"] = json!({
                "average_delivery_secs": Value::Object(latency),
                "uptime_secs": self.started_at.elapsed().as_secs(),
            });
            stats["errors"] = json!({
                "rolling_error_rate": self.metrics.rolling_error_rate(),
            });
        }

        stats
    }

    /// Prometheus exposition text
    pub fn export_metrics(&self) -> Result<String> {
        self.metrics.export()
    }

    fn publish_queue_depths(&self) {
        for (channel, depth) in self.queues.depths() {
            self.metrics.record_queue_depth(channel, depth);
        }
    }

    async fn worker_loop(self: Arc<Self>, channel: ChannelKind, worker_index: usize) {
        debug!(channel = %channel, worker_index, "worker started");
        loop {
            let id = tokio::select! {
                id = self.queues.dequeue(channel) => match id {
                    Some(id) => id,
                    None => break,
                },
                _ = self.shutdown.cancelled() => break,
            };
            self.deliver(channel, id).await;
            self.publish_queue_depths();
        }
        debug!(channel = %channel, worker_index, "worker stopped");
    }

    /// One delivery attempt for a dequeued notification
    async fn deliver(&self, channel: ChannelKind, id: Uuid) {
        // The CAS serialises against cancel and duplicate queue entries:
        // anything not Pending any more is simply dropped.
        let notification = match self.store.transition(
            id,
            NotificationStatus::Pending,
            NotificationStatus::Sending,
            |_| {},
        ) {
            Ok(n) => n,
            Err(_) => {
                debug!(notification_id = %id, "skipping entry no longer pending");
                return;
            }
        };

        let breaker = &self.breakers[&channel];
        if let Err(e) = breaker.acquire() {
            warn!(notification_id = %id, channel = %channel, "circuit open, deferring");
            self.metrics.record_retryable_failure(channel);
            self.finish_transient(channel, id, &e.to_string());
            return;
        }

        let adapter = &self.adapters[&channel];
        let started = Instant::now();
        let result =
            tokio::time::timeout(self.config.dispatch.send_timeout(), adapter.send(&notification))
                .await;
        let latency = started.elapsed();

        match result {
            Ok(Ok(receipt)) => {
                breaker.on_success();
                let transition = self.store.transition(
                    id,
                    NotificationStatus::Sending,
                    NotificationStatus::Sent,
                    |n| {
                        n.external_id = Some(receipt.external_id.clone());
                        n.last_error = None;
                    },
                );
                match transition {
                    Ok(_) => {
                        self.metrics.record_sent(channel, latency.as_secs_f64());
                        info!(
                            notification_id = %id,
                            channel = %channel,
                            external_id = %receipt.external_id,
                            latency_ms = latency.as_millis() as u64,
                            "notification sent"
                        );
                        self.complete(
                            id,
                            AttemptOutcome::Sent {
                                external_id: receipt.external_id,
                                latency,
                            },
                        );
                    }
                    Err(e) => error!(notification_id = %id, error = %e, "lost the sent CAS"),
                }
            }
            Ok(Err(SendError::Permanent(message))) => {
                // Permanent failures never touch the breaker.
                let _ = self.store.transition(
                    id,
                    NotificationStatus::Sending,
                    NotificationStatus::Failed,
                    |n| {
                        n.last_error = Some(message.clone());
                    },
                );
                self.metrics
                    .record_failed(channel, "permanent", latency.as_secs_f64());
                warn!(notification_id = %id, channel = %channel, error = %message, "permanent delivery failure");
                self.complete(id, AttemptOutcome::Failed { error: message });
            }
            Ok(Err(SendError::Transient(message))) => {
                breaker.on_transient_failure();
                self.finish_transient(channel, id, &message);
            }
            Err(_) => {
                breaker.on_transient_failure();
                let message = format!(
                    "send timed out after {}s",
                    self.config.dispatch.send_timeout_secs
                );
                self.finish_transient(channel, id, &message);
            }
        }
    }

    fn finish_transient(&self, channel: ChannelKind, id: Uuid, message: &str) {
        match self.retry.handle_transient_failure(id, message) {
            Ok(RetryOutcome::Requeued) => {
                self.metrics.record_retryable_failure(channel);
                self.complete(
                    id,
                    AttemptOutcome::Retrying {
                        error: message.to_string(),
                    },
                );
            }
            Ok(RetryOutcome::Exhausted) => {
                self.metrics.record_failed(channel, "transient", 0.0);
                self.complete(
                    id,
                    AttemptOutcome::Failed {
                        error: message.to_string(),
                    },
                );
            }
            Err(e) => {
                error!(notification_id = %id, error = %e, "retry bookkeeping failed");
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
