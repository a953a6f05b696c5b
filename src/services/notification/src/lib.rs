//! Courier notification delivery engine
//!
//! Accepts email, SMS and WhatsApp notification requests over HTTP,
//! validates and sanitizes them, rate-limits callers, and delivers through
//! per-channel adapters guarded by circuit breakers, priority queues and a
//! bounded-backoff retry scheduler. The lifecycle of every notification is
//! tracked in an authoritative store with manual retry, cancellation,
//! external-id lookup, listing, health and stats.
//!
//! # Usage
//!
//! ```rust,no_run
//! use courier_notification::{EngineConfig, NotificationService, create_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::from_env()?;
//!     let address = config.server_address();
//!     let service = NotificationService::new(config)?;
//!     service.start();
//!
//!     let router = create_router(service.clone());
//!     let listener = tokio::net::TcpListener::bind(&address).await?;
//!     axum::serve(listener, router).await?;
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod breaker;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod routes;
pub mod sanitize;
pub mod store;

pub use breaker::{CircuitBreaker, CircuitState};
pub use channels::{AdapterInfo, ChannelAdapter, ProviderReceipt, SendError};
pub use config::{EngineConfig, SanitizerPolicy};
pub use dispatch::{AcceptRequest, CallerContext, NotificationService};
pub use error::{EngineError, Result};
pub use metrics::EngineMetrics;
pub use queue::QueueManager;
pub use rate_limit::{RateDecision, RateLimiter};
pub use retry::RetryScheduler;
pub use routes::create_router;
pub use sanitize::Sanitizer;
pub use store::NotificationStore;

/// Service version, from the crate metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service name used in logs and diagnostics
pub const SERVICE_NAME: &str = "courier-notification";
