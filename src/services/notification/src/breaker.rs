//! Per-channel circuit breaker
//!
//! Standard three-state machine: Closed counts consecutive transient
//! failures and opens at the configured threshold; Open fast-fails until the
//! reset timeout elapses; HalfOpen admits exactly one probe, closing on
//! success and reopening on failure. Permanent delivery failures never touch
//! breaker state, so a stream of bad recipients cannot take a healthy
//! channel down.

use chrono::{DateTime, Utc};
use courier_shared::ChannelKind;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use crate::config::BreakerConfig;
use crate::error::{EngineError, Result};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// A recorded state transition, exposed through stats
#[derive(Debug, Clone, Serialize)]
pub struct CircuitTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

/// Circuit breaker guarding a single channel
pub struct CircuitBreaker {
    channel: ChannelKind,
    config: BreakerConfig,
    state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
    probe_in_flight: AtomicBool,
    transitions: Mutex<VecDeque<CircuitTransition>>,
}

impl CircuitBreaker {
    pub fn new(channel: ChannelKind, config: BreakerConfig) -> Self {
        Self {
            channel,
            config,
            state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            opened_at: RwLock::new(None),
            probe_in_flight: AtomicBool::new(false),
            transitions: Mutex::new(VecDeque::new()),
        }
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    /// Current state, promoting Open to HalfOpen if the reset timeout elapsed
    pub fn state(&self) -> CircuitState {
        let state = *self.state.read();
        if state == CircuitState::Open && self.reset_timeout_elapsed() {
            CircuitState::HalfOpen
        } else {
            state
        }
    }

    /// Ask permission to attempt a delivery on this channel
    pub fn acquire(&self) -> Result<()> {
        let state = *self.state.read();
        match state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                if self.reset_timeout_elapsed() {
                    self.transition(CircuitState::Open, CircuitState::HalfOpen);
                    self.try_admit_probe()
                } else {
                    Err(self.unavailable(CircuitState::Open))
                }
            }
            CircuitState::HalfOpen => self.try_admit_probe(),
        }
    }

    /// Record a successful delivery
    pub fn on_success(&self) {
        let state = *self.state.read();
        if state == CircuitState::HalfOpen {
            self.transition(CircuitState::HalfOpen, CircuitState::Closed);
            *self.opened_at.write() = None;
            self.probe_in_flight.store(false, Ordering::SeqCst);
        }
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Record a transient delivery failure
    pub fn on_transient_failure(&self) {
        let state = *self.state.read();
        match state {
            CircuitState::HalfOpen => {
                // Probe failed: reopen and restart the reset clock.
                self.transition(CircuitState::HalfOpen, CircuitState::Open);
                *self.opened_at.write() = Some(Instant::now());
                self.probe_in_flight.store(false, Ordering::SeqCst);
            }
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition(CircuitState::Closed, CircuitState::Open);
                    *self.opened_at.write() = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Consecutive transient failures seen while closed
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Recent state transitions, oldest first
    pub fn recent_transitions(&self) -> Vec<CircuitTransition> {
        self.transitions.lock().iter().cloned().collect()
    }

    fn try_admit_probe(&self) -> Result<()> {
        if self
            .probe_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Ok(())
        } else {
            Err(self.unavailable(CircuitState::HalfOpen))
        }
    }

    fn reset_timeout_elapsed(&self) -> bool {
        self.opened_at
            .read()
            .map(|opened| opened.elapsed() >= self.config.reset_timeout())
            .unwrap_or(false)
    }

    fn transition(&self, from: CircuitState, to: CircuitState) {
        let mut state = self.state.write();
        if *state != from {
            return;
        }
        *state = to;
        drop(state);

        tracing::info!(
            channel = %self.channel,
            from = %from,
            to = %to,
            "circuit breaker state change"
        );

        let mut history = self.transitions.lock();
        history.push_back(CircuitTransition {
            from,
            to,
            at: Utc::now(),
        });
        while history.len() > self.config.transition_history {
            history.pop_front();
        }
    }

    fn unavailable(&self, state: CircuitState) -> EngineError {
        EngineError::ChannelUnavailable {
            channel: self.channel,
            circuit_state: state.to_string(),
        }
    }
}
