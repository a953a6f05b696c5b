//! Metrics collection and health aggregation inputs
//!
//! Prometheus counters, gauges and histograms for delivery traffic, plus a
//! rolling window of recent outcomes that backs degraded-state detection.
//! The health verdict itself is assembled by the service, which also sees
//! breaker states and queue depths.

use courier_shared::ChannelKind;
use parking_lot::{Mutex, RwLock};
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Registry};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::MetricsConfig;
use crate::error::{EngineError, Result};

/// Aggregated per-channel delivery counts
#[derive(Debug, Clone, Serialize, Default)]
pub struct ChannelSnapshot {
    pub sent: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub average_delivery_secs: Option<f64>,
}

#[derive(Debug, Default, Clone)]
struct ChannelCounts {
    sent: u64,
    failed: u64,
    total_delivery_secs: f64,
}

/// Metrics collector for the delivery engine
pub struct EngineMetrics {
    config: MetricsConfig,
    registry: Arc<Registry>,

    notifications_sent: IntCounterVec,
    notifications_failed: IntCounterVec,
    delivery_duration: HistogramVec,
    queue_depth: IntGaugeVec,

    channel_counts: RwLock<HashMap<ChannelKind, ChannelCounts>>,
    // (when, failed) pairs for the rolling error rate
    recent_outcomes: Mutex<VecDeque<(Instant, bool)>>,
}

impl EngineMetrics {
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        let registry = Registry::new();

        let notifications_sent = IntCounterVec::new(
            prometheus::Opts::new(
                "notifications_sent_total",
                "Notifications successfully handed to a provider",
            )
            .namespace(&config.namespace),
            &["channel"],
        )
        .map_err(|e| EngineError::internal(format!("Failed to create sent counter: {}", e)))?;

        let notifications_failed = IntCounterVec::new(
            prometheus::Opts::new(
                "notifications_failed_total",
                "Notifications that failed terminally",
            )
            .namespace(&config.namespace),
            &["channel", "error_type"],
        )
        .map_err(|e| EngineError::internal(format!("Failed to create failed counter: {}", e)))?;

        let delivery_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "notification_delivery_duration_seconds",
                "Time from dispatch to provider outcome",
            )
            .namespace(&config.namespace)
            .buckets(config.histogram_buckets.clone()),
            &["channel", "status"],
        )
        .map_err(|e| EngineError::internal(format!("Failed to create duration histogram: {}", e)))?;

        let queue_depth = IntGaugeVec::new(
            prometheus::Opts::new("notification_queue_depth", "Entries queued per channel")
                .namespace(&config.namespace),
            &["channel"],
        )
        .map_err(|e| EngineError::internal(format!("Failed to create depth gauge: {}", e)))?;

        registry
            .register(Box::new(notifications_sent.clone()))
            .map_err(|e| EngineError::internal(format!("Failed to register sent counter: {}", e)))?;
        registry
            .register(Box::new(notifications_failed.clone()))
            .map_err(|e| {
                EngineError::internal(format!("Failed to register failed counter: {}", e))
            })?;
        registry
            .register(Box::new(delivery_duration.clone()))
            .map_err(|e| {
                EngineError::internal(format!("Failed to register duration histogram: {}", e))
            })?;
        registry
            .register(Box::new(queue_depth.clone()))
            .map_err(|e| EngineError::internal(format!("Failed to register depth gauge: {}", e)))?;

        Ok(Self {
            config: config.clone(),
            registry: Arc::new(registry),
            notifications_sent,
            notifications_failed,
            delivery_duration,
            queue_depth,
            channel_counts: RwLock::new(HashMap::new()),
            recent_outcomes: Mutex::new(VecDeque::new()),
        })
    }

    /// Record a successful provider hand-off
    pub fn record_sent(&self, channel: ChannelKind, delivery_secs: f64) {
        self.notifications_sent
            .with_label_values(&[channel.as_str()])
            .inc();
        self.delivery_duration
            .with_label_values(&[channel.as_str(), "success"])
            .observe(delivery_secs);

        let mut counts = self.channel_counts.write();
        let entry = counts.entry(channel).or_default();
        entry.sent += 1;
        entry.total_delivery_secs += delivery_secs;
        drop(counts);

        self.push_outcome(false);
    }

    /// Record a terminal delivery failure
    pub fn record_failed(&self, channel: ChannelKind, error_type: &str, delivery_secs: f64) {
        self.notifications_failed
            .with_label_values(&[channel.as_str(), error_type])
            .inc();
        self.delivery_duration
            .with_label_values(&[channel.as_str(), "failed"])
            .observe(delivery_secs);

        self.channel_counts.write().entry(channel).or_default().failed += 1;
        self.push_outcome(true);
    }

    /// Record a failed attempt that will be retried. Counts toward the
    /// rolling error rate but not the terminal failure counter.
    pub fn record_retryable_failure(&self, channel: ChannelKind) {
        self.delivery_duration
            .with_label_values(&[channel.as_str(), "retried"])
            .observe(0.0);
        self.push_outcome(true);
    }

    /// Update the queue depth gauge for a channel
    pub fn record_queue_depth(&self, channel: ChannelKind, depth: usize) {
        self.queue_depth
            .with_label_values(&[channel.as_str()])
            .set(depth as i64);
    }

    fn push_outcome(&self, failed: bool) {
        let mut outcomes = self.recent_outcomes.lock();
        outcomes.push_back((Instant::now(), failed));
        let horizon = Duration::from_secs(self.config.error_window_secs);
        while let Some((at, _)) = outcomes.front() {
            if at.elapsed() > horizon {
                outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    /// Share of failed outcomes over the rolling window (0 when idle)
    pub fn rolling_error_rate(&self) -> f64 {
        let horizon = Duration::from_secs(self.config.error_window_secs);
        let outcomes = self.recent_outcomes.lock();
        let (mut total, mut failed) = (0u64, 0u64);
        for (at, was_failure) in outcomes.iter() {
            if at.elapsed() <= horizon {
                total += 1;
                if *was_failure {
                    failed += 1;
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        }
    }

    /// True when the rolling error rate crosses the configured threshold
    pub fn is_degraded(&self) -> bool {
        self.rolling_error_rate() > self.config.degraded_error_rate
    }

    /// Per-channel aggregate counts
    pub fn channel_snapshots(&self) -> HashMap<ChannelKind, ChannelSnapshot> {
        let counts = self.channel_counts.read();
        ChannelKind::ALL
            .into_iter()
            .map(|channel| {
                let c = counts.get(&channel).cloned().unwrap_or_default();
                let attempts = c.sent + c.failed;
                let success_rate = if attempts > 0 {
                    c.sent as f64 / attempts as f64
                } else {
                    1.0
                };
                let average = if c.sent > 0 {
                    Some(c.total_delivery_secs / c.sent as f64)
                } else {
                    None
                };
                (
                    channel,
                    ChannelSnapshot {
                        sent: c.sent,
                        failed: c.failed,
                        success_rate,
                        average_delivery_secs: average,
                    },
                )
            })
            .collect()
    }

    /// Export the registry in Prometheus text format
    pub fn export(&self) -> Result<String> {
        let encoder = prometheus::TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .map_err(|e| EngineError::internal(format!("Failed to encode metrics: {}", e)))
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> EngineMetrics {
        EngineMetrics::new(&MetricsConfig {
            namespace: "courier_test".to_string(),
            ..MetricsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn snapshots_track_sent_and_failed() {
        let m = metrics();
        m.record_sent(ChannelKind::Email, 0.05);
        m.record_sent(ChannelKind::Email, 0.15);
        m.record_failed(ChannelKind::Email, "transient", 0.2);
        m.record_sent(ChannelKind::Sms, 0.01);

        let snapshots = m.channel_snapshots();
        let email = &snapshots[&ChannelKind::Email];
        assert_eq!(email.sent, 2);
        assert_eq!(email.failed, 1);
        assert!((email.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((email.average_delivery_secs.unwrap() - 0.1).abs() < 1e-9);

        let whatsapp = &snapshots[&ChannelKind::Whatsapp];
        assert_eq!(whatsapp.sent, 0);
        assert_eq!(whatsapp.success_rate, 1.0);
    }

    #[test]
    fn rolling_error_rate_reflects_recent_outcomes() {
        let m = metrics();
        assert_eq!(m.rolling_error_rate(), 0.0);
        m.record_sent(ChannelKind::Email, 0.01);
        m.record_failed(ChannelKind::Email, "transient", 0.01);
        assert!((m.rolling_error_rate() - 0.5).abs() < 1e-9);
        assert!(m.is_degraded());
    }

    #[test]
    fn retryable_failures_count_toward_degradation_only() {
        let m = metrics();
        m.record_retryable_failure(ChannelKind::Sms);
        assert_eq!(m.channel_snapshots()[&ChannelKind::Sms].failed, 0);
        assert_eq!(m.rolling_error_rate(), 1.0);
    }

    #[test]
    fn export_produces_prometheus_text() {
        let m = metrics();
        m.record_sent(ChannelKind::Email, 0.05);
        m.record_queue_depth(ChannelKind::Email, 3);
        let text = m.export().unwrap();
        assert!(text.contains("courier_test_notifications_sent_total"));
        assert!(text.contains("courier_test_notification_queue_depth"));
    }
}
