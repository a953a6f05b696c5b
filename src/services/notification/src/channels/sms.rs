//! SMS channel adapter
//!
//! Gateway provider stub. Checks the number shape and message length against
//! typical gateway limits, simulates the carrier hand-off, and mints the
//! gateway message sid.

use async_trait::async_trait;
use courier_shared::{ChannelKind, Notification};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{AdapterInfo, ChannelAdapter, ProviderReceipt, SendError};

/// Segmented messages above this are rejected rather than silently split.
const MAX_SMS_LENGTH: usize = 1600;

pub struct SmsAdapter {
    provider: String,
    simulated_latency: Duration,
}

impl SmsAdapter {
    pub fn new() -> Self {
        Self {
            provider: "sms-gateway".to_string(),
            simulated_latency: Duration::from_millis(15),
        }
    }

    #[cfg(test)]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            provider: "sms-gateway".to_string(),
            simulated_latency: latency,
        }
    }
}

impl Default for SmsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, notification: &Notification) -> Result<ProviderReceipt, SendError> {
        let digits: usize = notification
            .recipient
            .chars()
            .filter(|c| c.is_ascii_digit())
            .count();
        if !(6..=15).contains(&digits) {
            return Err(SendError::Permanent(format!(
                "invalid phone number: {}",
                notification.recipient
            )));
        }
        if notification.body.len() > MAX_SMS_LENGTH {
            return Err(SendError::Permanent(format!(
                "message exceeds {} characters",
                MAX_SMS_LENGTH
            )));
        }

        // Carrier hand-off.
        tokio::time::sleep(self.simulated_latency).await;

        let external_id = format!("sms-{}", Uuid::new_v4().simple());
        debug!(
            notification_id = %notification.id,
            external_id = %external_id,
            "sms handed to gateway"
        );

        Ok(ProviderReceipt {
            external_id,
            provider: self.provider.clone(),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: "sms".to_string(),
            provider: self.provider.clone(),
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_shared::{NotificationStatus, Priority, RetryPolicy};

    fn sms_notification(recipient: &str, body: &str) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            external_id: None,
            channel: ChannelKind::Sms,
            recipient: recipient.to_string(),
            subject: None,
            body: body.to_string(),
            template_id: None,
            payload: None,
            priority: Priority::Normal,
            status: NotificationStatus::Sending,
            retry_count: 0,
            retry_policy: RetryPolicy::default(),
            scheduled_for: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn valid_number_gets_a_receipt() {
        let adapter = SmsAdapter::with_latency(Duration::ZERO);
        let receipt = adapter
            .send(&sms_notification("+1 (555) 123-4567", "ping"))
            .await
            .unwrap();
        assert!(receipt.external_id.starts_with("sms-"));
    }

    #[tokio::test]
    async fn short_number_is_permanent() {
        let adapter = SmsAdapter::with_latency(Duration::ZERO);
        let err = adapter
            .send(&sms_notification("123", "ping"))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Permanent(_)));
    }

    #[tokio::test]
    async fn oversized_message_is_permanent() {
        let adapter = SmsAdapter::with_latency(Duration::ZERO);
        let err = adapter
            .send(&sms_notification("+15551234567", &"x".repeat(2000)))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Permanent(_)));
    }
}
