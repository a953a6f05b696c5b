//! Email channel adapter
//!
//! SMTP-style provider stub: validates the address shape, simulates relay
//! latency, and mints a message id the way an SMTP gateway would echo one
//! back. Swapping in a real relay means reimplementing `send` only.

use async_trait::async_trait;
use courier_shared::{ChannelKind, Notification};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{AdapterInfo, ChannelAdapter, ProviderReceipt, SendError};

pub struct EmailAdapter {
    provider: String,
    simulated_latency: Duration,
}

impl EmailAdapter {
    pub fn new() -> Self {
        Self {
            provider: "smtp-relay".to_string(),
            simulated_latency: Duration::from_millis(25),
        }
    }

    #[cfg(test)]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            provider: "smtp-relay".to_string(),
            simulated_latency: latency,
        }
    }
}

impl Default for EmailAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, notification: &Notification) -> Result<ProviderReceipt, SendError> {
        let recipient = notification.recipient.as_str();
        if !recipient.contains('@') || recipient.starts_with('@') || recipient.ends_with('@') {
            return Err(SendError::Permanent(format!(
                "invalid email address: {}",
                recipient
            )));
        }
        if notification.subject.as_deref().unwrap_or("").is_empty() {
            return Err(SendError::Permanent("email requires a subject".to_string()));
        }

        // Relay round trip.
        tokio::time::sleep(self.simulated_latency).await;

        let external_id = format!("smtp-{}", Uuid::new_v4().simple());
        debug!(
            notification_id = %notification.id,
            external_id = %external_id,
            "email handed to relay"
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
            name: "email".to_string(),
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

    fn email_notification(recipient: &str, subject: Option<&str>) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            external_id: None,
            channel: ChannelKind::Email,
            recipient: recipient.to_string(),
            subject: subject.map(String::from),
            body: "Hello".to_string(),
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
    async fn valid_email_gets_a_receipt() {
        let adapter = EmailAdapter::with_latency(Duration::ZERO);
        let receipt = adapter
            .send(&email_notification("user@example.com", Some("Hi")))
            .await
            .unwrap();
        assert!(receipt.external_id.starts_with("smtp-"));
        assert_eq!(receipt.provider, "smtp-relay");
    }

    #[tokio::test]
    async fn malformed_address_is_permanent() {
        let adapter = EmailAdapter::with_latency(Duration::ZERO);
        let err = adapter
            .send(&email_notification("no-at-sign", Some("Hi")))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Permanent(_)));
    }

    #[tokio::test]
    async fn missing_subject_is_permanent() {
        let adapter = EmailAdapter::with_latency(Duration::ZERO);
        let err = adapter
            .send(&email_notification("user@example.com", None))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Permanent(_)));
    }
}
