//! Per-target health state machine
//!
//! `Unknown → Healthy ↔ Degraded → Unhealthy`. Degraded after a configured
//! number of consecutive failures; Unhealthy after prolonged failure or when
//! a supervisor reports its restart cap. Every transition is observable
//! through a callback so the pool can emit a metric.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// Health of one backend target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// No observation yet
    Unknown,
    /// Recent calls succeeded
    Healthy,
    /// Consecutive failures past the degraded threshold
    Degraded,
    /// Prolonged failure or restart cap; calls short-circuit
    Unhealthy,
}

impl HealthState {
    /// Stable tag for status documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Failure thresholds for the state machine
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// Consecutive failures before `Degraded`
    pub degraded_after: u32,
    /// Consecutive failures before `Unhealthy`
    pub unhealthy_after: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_after: 3,
            unhealthy_after: 10,
        }
    }
}

/// Observed transition, handed to the transition hook
pub type Transition = (HealthState, HealthState);

/// Tracks one target's health
pub struct HealthTracker {
    target_id: String,
    state: Mutex<HealthState>,
    consecutive_failures: AtomicU32,
    transitions: AtomicU64,
    last_check: Mutex<Option<Instant>>,
    thresholds: HealthThresholds,
}

impl std::fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthTracker")
            .field("target_id", &self.target_id)
            .field("state", &self.state())
            .field(
                "consecutive_failures",
                &self.consecutive_failures.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl HealthTracker {
    /// Tracker starting at `Unknown`
    pub fn new(target_id: impl Into<String>, thresholds: HealthThresholds) -> Self {
        Self {
            target_id: target_id.into(),
            state: Mutex::new(HealthState::Unknown),
            consecutive_failures: AtomicU32::new(0),
            transitions: AtomicU64::new(0),
            last_check: Mutex::new(None),
            thresholds,
        }
    }

    /// Current state
    pub fn state(&self) -> HealthState {
        *self.state.lock()
    }

    /// When the target was last observed
    pub fn last_check(&self) -> Option<Instant> {
        *self.last_check.lock()
    }

    /// Consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// State transitions observed over this tracker's lifetime
    pub fn transition_count(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    /// Whether calls should be attempted at all
    pub fn is_available(&self) -> bool {
        self.state() != HealthState::Unhealthy
    }

    /// Record a successful call; returns the transition if the state changed
    pub fn record_success(&self) -> Option<Transition> {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.last_check.lock() = Some(Instant::now());
        self.transition_to(HealthState::Healthy)
    }

    /// Record a failed call; returns the transition if the state changed
    pub fn record_failure(&self) -> Option<Transition> {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_check.lock() = Some(Instant::now());

        let next = if failures >= self.thresholds.unhealthy_after {
            HealthState::Unhealthy
        } else if failures >= self.thresholds.degraded_after {
            HealthState::Degraded
        } else {
            return None;
        };
        self.transition_to(next)
    }

    /// Force `Unhealthy` (restart cap, handshake failure)
    pub fn mark_unhealthy(&self) -> Option<Transition> {
        *self.last_check.lock() = Some(Instant::now());
        self.transition_to(HealthState::Unhealthy)
    }

    fn transition_to(&self, next: HealthState) -> Option<Transition> {
        let mut state = self.state.lock();
        if *state == next {
            return None;
        }
        let previous = *state;
        *state = next;
        drop(state);
        self.transitions.fetch_add(1, Ordering::Relaxed);
        info!(
            target_id = %self.target_id,
            from = previous.as_str(),
            to = next.as_str(),
            "backend health transition"
        );
        Some((previous, next))
    }
}
