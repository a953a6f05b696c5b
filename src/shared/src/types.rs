//! Core domain types for the Courier notification platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// Channel, priority, status
// =============================================================================

/// A delivery medium. Closed set: adding a channel is a compile-time change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sms,
    Whatsapp,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Email, ChannelKind::Sms, ChannelKind::Whatsapp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Whatsapp => "whatsapp",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel: {0}")]
pub struct ParseChannelError(pub String);

impl std::str::FromStr for ChannelKind {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "whatsapp" => Ok(Self::Whatsapp),
            other => Err(ParseChannelError(other.to_string())),
        }
    }
}

/// Dispatch priority. Ordering is significant: `Urgent` sorts above `Low`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a notification record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    /// Terminal states admit no caller-initiated transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Sent | Self::Delivered | Self::Failed | Self::Cancelled
        )
    }

    /// The status transition table. `Sent -> Delivered` models a provider
    /// delivery receipt; `Sending -> Pending` is a retry requeue; `Failed ->
    /// Pending` is a manual retry of a non-exhausted record.
    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;
        matches!(
            (self, next),
            (Pending, Sending)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Sending, Sent)
                | (Sending, Failed)
                | (Sending, Pending)
                | (Sent, Delivered)
                | (Failed, Pending)
        )
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Retry policy
// =============================================================================

/// Bounded backoff policy applied between delivery attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_secs: 1,
            max_delay_secs: 300,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Base delay before the given attempt (1-based), exponential and capped.
    /// Monotonically non-decreasing in `attempt`; jitter is applied by the
    /// scheduler, not here.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let secs = (self.initial_delay_secs as f64 * exp).min(self.max_delay_secs as f64);
        Duration::from_secs_f64(secs.max(0.0))
    }
}

// =============================================================================
// The notification record
// =============================================================================

/// The unit of work owned by the notification store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    /// Provider-assigned identifier, set once the send succeeds.
    pub external_id: Option<String>,
    pub channel: ChannelKind,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub template_id: Option<String>,
    /// Opaque key/value payload handed to rendering; not interpreted here.
    pub payload: Option<serde_json::Value>,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub retry_count: u32,
    pub retry_policy: RetryPolicy,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Notification {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.retry_policy.max_retries
    }
}

// =============================================================================
// Request DTOs
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    pub to: String,
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub priority: Priority,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsRequest {
    pub to: String,
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppRequest {
    pub to: String,
    pub template_id: String,
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: Priority,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Channel-agnostic send request used by the generic dispatch endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub channel: ChannelKind,
    pub to: String,
    pub subject: Option<String>,
    #[serde(default)]
    pub content: String,
    pub template_id: Option<String>,
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: Priority,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchAction {
    Send,
    Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub action: DispatchAction,
    pub notification: Option<SendRequest>,
    pub notifications: Option<Vec<SendRequest>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRequest {
    pub id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub id: Uuid,
    pub reason: Option<String>,
}

// =============================================================================
// Response DTOs
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    pub id: Uuid,
    pub channel: ChannelKind,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub message: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized_recipient: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<BatchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub notifications: Vec<Notification>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalLookupResponse {
    pub id: Uuid,
    pub external_id: String,
    pub channel: ChannelKind,
    pub status: NotificationStatus,
}

/// Ticket returned by a manual retry: a fresh identity cross-referenced to the
/// original record, whose `retry_count` reflects the attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryTicket {
    pub retry_id: Uuid,
    pub original_id: Uuid,
    pub retry_config: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub id: Uuid,
    pub status: NotificationStatus,
}
