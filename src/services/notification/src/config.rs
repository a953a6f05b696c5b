//! Configuration management for the notification delivery engine
//!
//! Configuration is layered: struct defaults, then environment variables with
//! the `COURIER__` prefix (e.g. `COURIER__SERVER__PORT=9090`), then an
//! optional config file named by `COURIER_CONFIG_FILE`. `validate()` runs at
//! startup and fails fast on nonsensical values.

use courier_shared::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Top-level configuration for the engine and its HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub sanitizer: SanitizerConfig,
    pub rate_limit: RateLimitConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub dispatch: DispatchConfig,
    pub metrics: MetricsConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8087),
            workers: env::var("SERVER_WORKERS")
                .ok()
                .and_then(|w| w.parse().ok())
                .unwrap_or_else(num_cpus::get),
            request_timeout_secs: 30,
        }
    }
}

/// What to do with unsafe content in a request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SanitizerPolicy {
    /// Reject the request with a security validation error
    Reject,
    /// Strip the offending patterns and continue
    #[default]
    Clean,
}

/// Validator/sanitizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizerConfig {
    pub policy: SanitizerPolicy,
    pub max_content_length: usize,
    pub max_subject_length: usize,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        let policy = match env::var("SANITIZER_POLICY").as_deref() {
            Ok("reject") => SanitizerPolicy::Reject,
            _ => SanitizerPolicy::Clean,
        };
        Self {
            policy,
            max_content_length: 100_000,
            max_subject_length: 500,
        }
    }
}

/// Per-identity rate limiting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub limit: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: env::var("RATE_LIMIT")
                .ok()
                .and_then(|l| l.parse().ok())
                .unwrap_or(30),
            window_secs: 60,
        }
    }
}

/// Per-channel circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub transition_history: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 30,
            transition_history: 16,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

/// Default retry/backoff behaviour applied to new notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
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

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay_secs: self.initial_delay_secs,
            max_delay_secs: self.max_delay_secs,
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

/// Worker pool and dispatch timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Worker tasks per channel
    pub workers_per_channel: usize,
    /// Timeout applied to a single adapter send
    pub send_timeout_secs: u64,
    /// How long "send now" endpoints wait for the first attempt's outcome
    pub await_timeout_secs: u64,
    /// Concurrency cap for batch submissions
    pub batch_concurrency: usize,
    /// Maximum notifications in a single batch request
    pub max_batch_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers_per_channel: 2,
            send_timeout_secs: 10,
            await_timeout_secs: 15,
            batch_concurrency: 10,
            max_batch_size: 100,
        }
    }
}

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn await_timeout(&self) -> Duration {
        Duration::from_secs(self.await_timeout_secs)
    }
}

/// Metrics and health aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub namespace: String,
    pub histogram_buckets: Vec<f64>,
    /// Rolling window for error-rate based degradation detection
    pub error_window_secs: u64,
    /// Error rate (0..1) over the window above which health reports degraded
    pub degraded_error_rate: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "courier".to_string(),
            histogram_buckets: vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            error_window_secs: 60,
            degraded_error_rate: 0.25,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables and optional file
    pub fn from_env() -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default()).map_err(
                |e| EngineError::config(format!("Failed to build default config: {}", e)),
            )?)
            .add_source(
                config::Environment::with_prefix("COURIER")
                    .prefix_separator("__")
                    .separator("__"),
            );

        if let Ok(path) = env::var("COURIER_CONFIG_FILE") {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        let config: EngineConfig = builder
            .build()
            .map_err(|e| EngineError::config(format!("Failed to load configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| EngineError::config(format!("Failed to parse configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(EngineError::config("Server port cannot be 0"));
        }
        if self.server.workers == 0 {
            return Err(EngineError::config("Server workers cannot be 0"));
        }
        if self.rate_limit.limit == 0 {
            return Err(EngineError::config("Rate limit cannot be 0"));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(EngineError::config("Rate limit window cannot be 0"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(EngineError::config(
                "Circuit breaker failure threshold cannot be 0",
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(EngineError::config(
                "Retry multiplier must be at least 1.0",
            ));
        }
        if self.retry.initial_delay_secs > self.retry.max_delay_secs {
            return Err(EngineError::config(
                "Retry initial delay cannot exceed max delay",
            ));
        }
        if self.dispatch.workers_per_channel == 0 {
            return Err(EngineError::config("Workers per channel cannot be 0"));
        }
        if self.dispatch.max_batch_size == 0 {
            return Err(EngineError::config("Max batch size cannot be 0"));
        }
        if !(0.0..=1.0).contains(&self.metrics.degraded_error_rate) {
            return Err(EngineError::config(
                "Degraded error rate must be between 0 and 1",
            ));
        }
        Ok(())
    }

    /// Server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
