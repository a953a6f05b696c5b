//! WhatsApp channel adapter
//!
//! Business-API provider stub. WhatsApp sends are template based: the
//! adapter requires a template id and treats an unknown or empty one as a
//! permanent rejection, mirroring the platform's template approval flow.

use async_trait::async_trait;
use courier_shared::{ChannelKind, Notification};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{AdapterInfo, ChannelAdapter, ProviderReceipt, SendError};

pub struct WhatsAppAdapter {
    provider: String,
    simulated_latency: Duration,
}

impl WhatsAppAdapter {
    pub fn new() -> Self {
        Self {
            provider: "whatsapp-business".to_string(),
            simulated_latency: Duration::from_millis(20),
        }
    }

    #[cfg(test)]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            provider: "whatsapp-business".to_string(),
            simulated_latency: latency,
        }
    }
}

impl Default for WhatsAppAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Whatsapp
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
        match notification.template_id.as_deref() {
            None | Some("") => {
                return Err(SendError::Permanent(
                    "whatsapp requires an approved template id".to_string(),
                ));
            }
            Some(_) => {}
        }

        // Business API round trip.
        tokio::time::sleep(self.simulated_latency).await;

        let external_id = format!("wamid-{}", Uuid::new_v4().simple());
        debug!(
            notification_id = %notification.id,
            external_id = %external_id,
            template_id = ?notification.template_id,
            "whatsapp message accepted"
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
            name: "whatsapp".to_string(),
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

    fn whatsapp_notification(template_id: Option<&str>) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            external_id: None,
            channel: ChannelKind::Whatsapp,
            recipient: "+15551234567".to_string(),
            subject: None,
            body: "order update".to_string(),
            template_id: template_id.map(String::from),
            payload: Some(serde_json::json!({"order_id": "A-1001"})),
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
    async fn templated_message_gets_a_receipt() {
        let adapter = WhatsAppAdapter::with_latency(Duration::ZERO);
        let receipt = adapter
            .send(&whatsapp_notification(Some("order_update_v2")))
            .await
            .unwrap();
        assert!(receipt.external_id.starts_with("wamid-"));
    }

    #[tokio::test]
    async fn missing_template_is_permanent() {
        let adapter = WhatsAppAdapter::with_latency(Duration::ZERO);
        for template in [None, Some("")] {
            let err = adapter
                .send(&whatsapp_notification(template))
                .await
                .unwrap_err();
            assert!(matches!(err, SendError::Permanent(_)));
        }
    }
}
