//! Channel adapters
//!
//! One adapter per `ChannelKind`, all behind the `ChannelAdapter` trait so
//! the dispatcher routes on the enum alone. Adapters classify their own
//! failures: `Permanent` for anything a retry cannot fix (malformed
//! recipient, rejected template), `Transient` for provider hiccups. The
//! per-attempt timeout lives in the dispatcher, which treats it as
//! transient.

pub mod email;
pub mod sms;
pub mod whatsapp;

pub use email::EmailAdapter;
pub use sms::SmsAdapter;
pub use whatsapp::WhatsAppAdapter;

use async_trait::async_trait;
use courier_shared::{ChannelKind, Notification};
use serde::Serialize;
use thiserror::Error;

/// Failure classification for a single delivery attempt
#[derive(Error, Debug, Clone)]
pub enum SendError {
    /// Worth retrying: provider overload, connection loss, throttling
    #[error("transient send failure: {0}")]
    Transient(String),
    /// Not worth retrying: malformed recipient, rejected content
    #[error("permanent send failure: {0}")]
    Permanent(String),
}

/// Provider acknowledgement of an accepted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReceipt {
    pub external_id: String,
    pub provider: String,
}

/// Static description of an adapter, surfaced through health and stats
#[derive(Debug, Clone, Serialize)]
pub struct AdapterInfo {
    pub name: String,
    pub provider: String,
    pub enabled: bool,
}

/// A delivery channel the dispatcher can hand notifications to
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Which channel this adapter serves
    fn kind(&self) -> ChannelKind;

    /// Attempt one delivery; returns the provider receipt on success
    async fn send(&self, notification: &Notification) -> Result<ProviderReceipt, SendError>;

    /// Whether the provider connection is currently usable
    async fn health_check(&self) -> bool;

    /// Adapter metadata
    fn info(&self) -> AdapterInfo;
}
