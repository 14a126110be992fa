// Copyright (c) 2026 Cortex Labs, Inc.
// SPDX-License-Identifier: AGPL-3.0
//! # Circuit Breaker — Model-Call Health Gate (ADR-007)
//!
//! Shields the model pipeline from a degraded provider. The breaker is an
//! explicitly owned value, shared as `Arc<CircuitBreaker>` and injected into
//! the runners; interior state sits behind a mutex so concurrent jobs observe
//! consistent transitions.
//!
//! ## State machine
//!
//! - **Closed**: calls flow. The threshold-th consecutive failure opens the
//!   circuit.
//! - **Open**: calls are rejected. Once `current_timeout` has elapsed since
//!   the last failure the next [`CircuitBreaker::can_execute`] flips the
//!   state to half-open — the transition happens lazily at read time, there
//!   is no background timer.
//! - **HalfOpen**: probe calls flow. A success fully resets (closed, initial
//!   timeout, zero consecutive failures); a failure reopens and doubles
//!   `current_timeout`, capped at `max_timeout`.
//!
//! Only post-admission call health is recorded here. Policy rejections never
//! touch the breaker. State is process-local: a restart starts closed.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::domain::engine_config::BreakerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Open-state wait before the first half-open probe
    pub initial_timeout: Duration,

    /// Ceiling for the doubling timeout
    pub max_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            initial_timeout: Duration::from_millis(60_000),
            max_timeout: Duration::from_millis(900_000),
        }
    }
}

impl From<&BreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            initial_timeout: settings.initial_timeout(),
            max_timeout: settings.max_timeout(),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    total_failures: u64,
    total_successes: u64,
    last_failure_at: Option<Instant>,
    current_timeout: Duration,
}

/// Point-in-time view for health surfaces
#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub current_timeout_ms: u64,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let current_timeout = config.initial_timeout;
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                total_failures: 0,
                total_successes: 0,
                last_failure_at: None,
                current_timeout,
            }),
        }
    }

    /// Whether a call may proceed right now. May flip open -> half-open.
    pub fn can_execute(&self) -> bool {
        self.can_execute_at(Instant::now())
    }

    fn can_execute_at(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match inner.last_failure_at {
                Some(failed_at) if now.duration_since(failed_at) >= inner.current_timeout => {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!(
                        timeout_ms = inner.current_timeout.as_millis() as u64,
                        "circuit breaker half-open, allowing probe call"
                    );
                    true
                }
                _ => false,
            },
        }
    }

    /// Record a healthy model call: full reset.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        let was = inner.state;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.current_timeout = self.config.initial_timeout;
        inner.total_successes += 1;
        if was != CircuitState::Closed {
            tracing::info!(from = was.as_str(), "circuit breaker closed");
        }
    }

    /// Record a failed model call.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.total_failures += 1;
        inner.last_failure_at = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                // Failed probe: reopen and double the wait, capped.
                inner.state = CircuitState::Open;
                inner.current_timeout = inner
                    .current_timeout
                    .saturating_mul(2)
                    .min(self.config.max_timeout);
                tracing::warn!(
                    timeout_ms = inner.current_timeout.as_millis() as u64,
                    "circuit breaker probe failed, reopening"
                );
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        consecutive_failures = inner.consecutive_failures,
                        timeout_ms = inner.current_timeout.as_millis() as u64,
                        "circuit breaker opened"
                    );
                }
            }
            // Already open: in-flight stragglers just refresh the stamp.
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            current_timeout_ms: inner.current_timeout.as_millis() as u64,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
