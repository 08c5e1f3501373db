//! Per-connector circuit breaker.
//!
//! One instance is shared by every claim that routes through the connector,
//! so its state is global. All transitions happen under a single lock.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use claimbridge_model::{CircuitState, ConnectorHealth};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::connectors::ConnectorDescriptor;

const LATENCY_EWMA_ALPHA: f64 = 0.2;

/// Admission granted by [`CircuitBreaker::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Ordinary call through a closed breaker.
    Normal,
    /// The single trial call allowed in `half_open`.
    Probe,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// Timestamps of the current unbroken failure streak.
    streak: VecDeque<Instant>,
    /// Every failure inside the window, successes notwithstanding.
    recent: VecDeque<Instant>,
    cooldown: Duration,
    cooldown_until: Option<Instant>,
    cooldown_until_wall: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    avg_latency_ms: f64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    window: Duration,
    base_cooldown: Duration,
    max_cooldown: Duration,
    inner: Mutex<BreakerState>,
}

fn to_wall(from_now: Duration) -> DateTime<Utc> {
    Utc::now()
        + chrono::Duration::from_std(from_now)
            .unwrap_or_else(|_| chrono::Duration::zero())
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            threshold: config.failure_threshold.max(1),
            window: config.failure_window(),
            base_cooldown: config.cooldown(),
            max_cooldown: config.max_cooldown(),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                streak: VecDeque::new(),
                recent: VecDeque::new(),
                cooldown: config.cooldown(),
                cooldown_until: None,
                cooldown_until_wall: None,
                last_failure_at: None,
                probe_in_flight: false,
                avg_latency_ms: 0.0,
            }),
        }
    }

    /// Ask to make a call. `Err` carries how long until a probe is allowed.
    pub fn acquire(&self) -> Result<Permit, Duration> {
        let now = Instant::now();
        let mut s = self.inner.lock();
        match s.state {
            CircuitState::Closed => Ok(Permit::Normal),
            CircuitState::Open => {
                let until = s.cooldown_until.unwrap_or(now);
                if now < until {
                    return Err(until - now);
                }
                s.state = CircuitState::HalfOpen;
                s.probe_in_flight = true;
                Ok(Permit::Probe)
            }
            CircuitState::HalfOpen => {
                if s.probe_in_flight {
                    Err(Duration::ZERO)
                } else {
                    s.probe_in_flight = true;
                    Ok(Permit::Probe)
                }
            }
        }
    }

    pub fn record_success(&self, permit: Permit, latency: Duration) {
        let mut s = self.inner.lock();
        Self::observe_latency(&mut s, latency);
        s.streak.clear();
        if permit == Permit::Probe {
            s.state = CircuitState::Closed;
            s.probe_in_flight = false;
            s.cooldown = self.base_cooldown;
            s.cooldown_until = None;
            s.cooldown_until_wall = None;
            info!(target: "claims::resilience", "probe succeeded; breaker closed");
        }
    }

    pub fn record_failure(&self, permit: Permit, latency: Duration) {
        let now = Instant::now();
        let mut s = self.inner.lock();
        Self::observe_latency(&mut s, latency);
        s.last_failure_at = Some(Utc::now());
        s.recent.push_back(now);
        Self::prune(&mut s.recent, now, self.window);

        if permit == Permit::Probe {
            let doubled = s.cooldown.saturating_mul(2).min(self.max_cooldown);
            s.cooldown = doubled;
            self.open(&mut s, now);
            warn!(
                target: "claims::resilience",
                cooldown_ms = doubled.as_millis() as u64,
                "probe failed; breaker re-opened"
            );
            return;
        }

        s.streak.push_back(now);
        Self::prune(&mut s.streak, now, self.window);
        if s.state == CircuitState::Closed
            && s.streak.len() as u32 >= self.threshold
        {
            s.cooldown = self.base_cooldown;
            self.open(&mut s, now);
            warn!(
                target: "claims::resilience",
                failures = self.threshold,
                cooldown_ms = self.base_cooldown.as_millis() as u64,
                "breaker opened"
            );
        }
    }

    fn open(&self, s: &mut BreakerState, now: Instant) {
        s.state = CircuitState::Open;
        s.probe_in_flight = false;
        s.cooldown_until = Some(now + s.cooldown);
        s.cooldown_until_wall = Some(to_wall(s.cooldown));
    }

    fn prune(events: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = events.front() {
            if now.duration_since(*front) > window {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    fn observe_latency(s: &mut BreakerState, latency: Duration) {
        let sample = latency.as_secs_f64() * 1_000.0;
        s.avg_latency_ms = if s.avg_latency_ms == 0.0 {
            sample
        } else {
            s.avg_latency_ms * (1.0 - LATENCY_EWMA_ALPHA)
                + sample * LATENCY_EWMA_ALPHA
        };
    }

    /// State as seen by routing: an open breaker whose cooldown has elapsed
    /// reports `half_open`, since the next call would be admitted as a probe.
    pub fn state(&self) -> CircuitState {
        let s = self.inner.lock();
        Self::effective_state(&s, Instant::now())
    }

    fn effective_state(s: &BreakerState, now: Instant) -> CircuitState {
        match (s.state, s.cooldown_until) {
            (CircuitState::Open, Some(until)) if now >= until => {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    pub fn health(&self, descriptor: &ConnectorDescriptor) -> ConnectorHealth {
        let now = Instant::now();
        let mut s = self.inner.lock();
        Self::prune(&mut s.recent, now, self.window);
        ConnectorHealth {
            connector_id: descriptor.id.clone(),
            kind: descriptor.kind,
            priority: descriptor.priority,
            state: Self::effective_state(&s, now),
            consecutive_failures: s.streak.len() as u32,
            recent_failures: s.recent.len() as u32,
            last_failure_at: s.last_failure_at,
            cooldown_until: s.cooldown_until_wall,
            avg_latency_ms: s.avg_latency_ms,
        }
    }

    pub fn current_cooldown(&self) -> Duration {
        self.inner.lock().cooldown
    }
}
