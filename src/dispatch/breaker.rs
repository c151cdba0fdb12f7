//! Per-tier circuit breaker.
//!
//! Each tier owns its breaker, so a BIG-tier outage never blocks SMALL
//! traffic. The outcome window and the state transition live under one
//! mutex: recording a result and any resulting flip are a single logical
//! operation, so two concurrent failures can never both observe CLOSED and
//! race the open transition.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::tier::Tier;

/// Completed calls remembered per tier.
const WINDOW_SIZE: usize = 100;

/// Observable breaker phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum State {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { probe_in_flight: bool },
}

#[derive(Debug)]
struct Inner {
    state: State,
    /// Outcomes of the last `WINDOW_SIZE` completed calls; `false` = failure.
    window: VecDeque<bool>,
}

/// Failure containment for one tier's reasoning-service traffic.
#[derive(Debug)]
pub struct CircuitBreaker {
    tier: Tier,
    failure_threshold: usize,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(tier: Tier, failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            tier,
            failure_threshold,
            cooldown,
            inner: Mutex::new(Inner {
                state: State::Closed,
                window: VecDeque::with_capacity(WINDOW_SIZE),
            }),
        }
    }

    /// Whether a new dispatch would be admitted right now. Pure check.
    pub fn would_admit(&self) -> bool {
        let inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            State::Closed => true,
            State::Open { opened_at } => opened_at.elapsed() >= self.cooldown,
            State::HalfOpen { probe_in_flight } => !probe_in_flight,
        }
    }

    /// Admits a dispatch, flipping OPEN to HALF_OPEN once the cool-down has
    /// elapsed. In HALF_OPEN exactly one probe is admitted; everything else
    /// is rejected until the probe completes.
    pub fn admit(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            State::Closed => true,
            State::Open { opened_at } => {
                if opened_at.elapsed() >= self.cooldown {
                    info!(tier = %self.tier, "circuit half-open, admitting probe");
                    inner.state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    true
                } else {
                    false
                }
            }
            State::HalfOpen {
                ref mut probe_in_flight,
            } => {
                if *probe_in_flight {
                    false
                } else {
                    *probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Records a completed call and applies any state transition atomically
    /// with it.
    pub fn record(&self, success: bool) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            State::HalfOpen { .. } => {
                if success {
                    info!(tier = %self.tier, "probe succeeded, circuit closed");
                    inner.state = State::Closed;
                    inner.window.clear();
                } else {
                    warn!(tier = %self.tier, "probe failed, circuit re-opened");
                    inner.state = State::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            State::Closed => {
                if inner.window.len() == WINDOW_SIZE {
                    inner.window.pop_front();
                }
                inner.window.push_back(success);
                let failures = inner.window.iter().filter(|ok| !**ok).count();
                if failures >= self.failure_threshold {
                    warn!(
                        tier = %self.tier,
                        failures,
                        window = inner.window.len(),
                        "failure threshold reached, circuit opened"
                    );
                    inner.state = State::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            // A straggler completing after the circuit opened still lands
            // in the window but cannot cause a transition.
            State::Open { .. } => {
                if inner.window.len() == WINDOW_SIZE {
                    inner.window.pop_front();
                }
                inner.window.push_back(success);
            }
        }
    }

    pub fn phase(&self) -> CircuitPhase {
        let inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            State::Closed => CircuitPhase::Closed,
            State::Open { .. } => CircuitPhase::Open,
            State::HalfOpen { .. } => CircuitPhase::HalfOpen,
        }
    }
}
