//! Circuit breaker guarding new connection attempts
//!
//! The breaker counts consecutive failed connection attempts. Once the
//! count reaches the threshold it opens and `acquire` fails fast with
//! `CircuitOpen` without touching the network.
//!
//! # States
//!
//! - **Closed**: attempts pass through
//! - **Open**: attempts are rejected
//! - **HalfOpen**: the cool-down elapsed; a single probe attempt is let
//!   through and its outcome closes or re-opens the breaker
//!
//! With no cool-down configured the breaker never leaves `Open` on its
//! own; only [`CircuitBreaker::reset`] (or a pool shutdown) closes it.
//!
//! [`CircuitBreaker::allow_request`] hands out an [`Admission`]. Dropping
//! the half-open probe's admission without reporting an outcome (the
//! attempt was cancelled) frees the probe slot for the next caller.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[cfg(test)]
mod tests;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Consecutive-failure circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u64,
    cooldown: Option<Duration>,
    state: AtomicU8,
    failure_count: AtomicU64,
    opened_at: Mutex<Option<Instant>>,
    probe_in_flight: AtomicBool,
    // Bumped on every transition; a stale probe admission must not free
    // the slot of a later probe.
    epoch: AtomicU64,
}

/// Permission for one connection attempt.
///
/// Report the outcome with [`succeeded`](Self::succeeded),
/// [`failed`](Self::failed) or [`inconclusive`](Self::inconclusive).
#[must_use = "an admission should report the attempt's outcome"]
#[derive(Debug)]
pub struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    probe: Option<u64>,
}

impl Admission<'_> {
    /// Whether this is the single half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    pub fn succeeded(mut self) {
        self.probe = None;
        self.breaker.record_success();
    }

    pub fn failed(mut self) {
        self.probe = None;
        self.breaker.record_failure();
    }

    /// The attempt said nothing about the backend (e.g. the pool was
    /// full). Same as dropping the admission: a probe slot is freed.
    pub fn inconclusive(self) {}
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if let Some(epoch) = self.probe.take() {
            self.breaker.abandon_probe(epoch);
        }
    }
}

impl CircuitBreaker {
    /// Create a closed breaker.
    ///
    /// `cooldown = None` makes a trip permanent until [`reset`](Self::reset).
    pub fn new(failure_threshold: u64, cooldown: Option<Duration>) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU64::new(0),
            opened_at: Mutex::new(None),
            probe_in_flight: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.load(Ordering::SeqCst).into()
    }

    /// Consecutive failures since the last success or reset
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::SeqCst)
    }

    pub fn failure_threshold(&self) -> u64 {
        self.failure_threshold
    }

    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown
    }

    /// Whether the breaker is tripped, as last observed.
    ///
    /// An open breaker whose cool-down has elapsed still reports `true`
    /// until the next [`allow_request`](Self::allow_request) moves it to
    /// half-open.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Decide whether a connection attempt may proceed
    pub fn allow_request(&self) -> Option<Admission<'_>> {
        match self.state() {
            CircuitState::Closed => Some(self.admit(None)),
            CircuitState::Open => {
                let cooldown = self.cooldown?;
                let elapsed = self
                    .opened_at
                    .lock()
                    .is_some_and(|opened| opened.elapsed() >= cooldown);
                if !elapsed {
                    return None;
                }
                self.state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .ok()?;
                let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                self.probe_in_flight.store(true, Ordering::SeqCst);
                tracing::info!("circuit breaker half-open, letting one probe through");
                Some(self.admit(Some(epoch)))
            }
            // One probe at a time
            CircuitState::HalfOpen => {
                if self.probe_in_flight.swap(true, Ordering::SeqCst) {
                    return None;
                }
                let epoch = self.epoch.load(Ordering::SeqCst);
                Some(self.admit(Some(epoch)))
            }
        }
    }

    fn admit(&self, probe: Option<u64>) -> Admission<'_> {
        Admission {
            breaker: self,
            probe,
        }
    }

    fn abandon_probe(&self, epoch: u64) {
        if self.state() == CircuitState::HalfOpen && self.epoch.load(Ordering::SeqCst) == epoch {
            self.probe_in_flight.store(false, Ordering::SeqCst);
            tracing::debug!("half-open probe ended without an outcome, slot freed");
        }
    }

    /// A connection attempt succeeded
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        if self.state() != CircuitState::Closed {
            self.close();
            tracing::info!("circuit breaker closed");
        }
    }

    /// A connection attempt failed
    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        match self.state() {
            CircuitState::HalfOpen => self.trip(failures),
            CircuitState::Closed if failures >= self.failure_threshold => self.trip(failures),
            _ => {}
        }
    }

    /// Close the breaker and clear the failure count
    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        self.close();
    }

    fn close(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.opened_at.lock() = None;
        self.probe_in_flight.store(false, Ordering::SeqCst);
        self.state
            .store(CircuitState::Closed as u8, Ordering::SeqCst);
    }

    fn trip(&self, failures: u64) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.opened_at.lock() = Some(Instant::now());
        self.probe_in_flight.store(false, Ordering::SeqCst);
        self.state.store(CircuitState::Open as u8, Ordering::SeqCst);
        tracing::warn!(
            failures,
            threshold = self.failure_threshold,
            cooldown = ?self.cooldown,
            "circuit breaker opened"
        );
    }
}
