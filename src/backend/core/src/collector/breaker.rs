//! Sampling circuit breaker.
//!
//! Consecutive adapter-collect failures trip the breaker; while open, cycles
//! are skipped cheaply and the database is reported offline. After the
//! cooldown a single probe is allowed; its outcome closes or re-opens the
//! breaker.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, every cycle samples
    Closed,
    /// Sampling suspended, database reported offline
    Open,
    /// Cooldown elapsed, one probe cycle allowed
    HalfOpen,
}

/// Breaker over the adapter's collect path.
pub struct SamplingBreaker {
    state: RwLock<BreakerState>,
    consecutive_failures: AtomicU32,
    threshold: u32,
    opened_at: RwLock<Option<Instant>>,
    cooldown: Duration,
}

impl SamplingBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: RwLock::new(BreakerState::Closed),
            consecutive_failures: AtomicU32::new(0),
            threshold: threshold.max(1),
            opened_at: RwLock::new(None),
            cooldown,
        }
    }

    /// Whether this cycle should attempt a collect.
    pub fn allow_cycle(&self) -> bool {
        let state = *self.state.read();
        match state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self.opened_at.read().map(|t| t.elapsed());
                if matches!(elapsed, Some(e) if e >= self.cooldown) {
                    *self.state.write() = BreakerState::HalfOpen;
                    tracing::info!("Sampling breaker half-open, probing adapter");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful collect. Returns true when this closed an open
    /// breaker (the database came back).
    pub fn record_success(&self) -> bool {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.state.write();
        let recovered = *state == BreakerState::HalfOpen;
        if recovered {
            tracing::info!("Sampling breaker closed after successful probe");
            *self.opened_at.write() = None;
        }
        *state = BreakerState::Closed;
        recovered
    }

    /// Record a failed collect. Returns true when this call tripped the
    /// breaker open.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.write();
        match *state {
            BreakerState::HalfOpen => {
                *state = BreakerState::Open;
                *self.opened_at.write() = Some(Instant::now());
                false
            }
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.threshold {
                    *state = BreakerState::Open;
                    *self.opened_at.write() = Some(Instant::now());
                    tracing::warn!(
                        failures = failures,
                        threshold = self.threshold,
                        "Sampling breaker opened"
                    );
                    return true;
                }
                false
            }
            BreakerState::Open => false,
        }
    }

    pub fn state(&self) -> BreakerState {
        *self.state.read()
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}
