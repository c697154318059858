//! Circuit breaker state machine.
//!
//! Pure, clock-injected state transitions shared by the keyed breaker and the
//! provider manager. Callers own locking and persistence; every method that may
//! change the state returns the [`Transition`] it performed so the caller can
//! log and persist it.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on retained timestamps per window.
const MAX_HISTORY: usize = 1024;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    #[default]
    Closed,
    /// Circuit is open - calls are blocked
    Open,
    /// Circuit is half-open - a single probe may test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        write!(f, "{s}")
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of triggers within `trigger_window` that opens the circuit.
    /// `None` disables frequency tracking.
    pub trigger_threshold: Option<usize>,
    pub trigger_window: Duration,
    /// Number of failures that opens the circuit
    pub failure_threshold: usize,
    /// Sliding failure window. `None` counts failures until the next success.
    pub failure_window: Option<Duration>,
    /// Time spent OPEN before a probe is allowed
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: Some(5),
            trigger_window: Duration::from_secs(300),
            failure_threshold: 3,
            failure_window: Some(Duration::from_secs(300)),
            cooldown: Duration::from_secs(300),
        }
    }
}

impl CircuitBreakerConfig {
    /// Provider-scoped breaker: three consecutive failures, five minute cooldown.
    pub fn consecutive_failures(failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            trigger_threshold: None,
            trigger_window: Duration::ZERO,
            failure_threshold,
            failure_window: None,
            cooldown,
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The single half-open trial call
    Probe,
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: &'static str,
    pub at: DateTime<Utc>,
}

pub const REASON_TOO_FREQUENT: &str = "too frequent";
pub const REASON_TOO_MANY_FAILURES: &str = "too many failures";
pub const REASON_PROBE_FAILED: &str = "half-open probe failed";
pub const REASON_PROBE_SUCCEEDED: &str = "half-open probe succeeded";
pub const REASON_COOLDOWN_ELAPSED: &str = "cooldown elapsed";

/// Persisted form of one circuit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trigger_history: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub failure_history: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct CircuitStateMachine {
    state: CircuitState,
    trigger_history: VecDeque<DateTime<Utc>>,
    failure_history: VecDeque<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    probe_started_at: Option<DateTime<Utc>>,
}

impl CircuitStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn failure_count(&self) -> usize {
        self.failure_history.len()
    }

    pub fn trigger_count(&self) -> usize {
        self.trigger_history.len()
    }

    pub fn probe_in_flight(&self) -> bool {
        self.probe_started_at.is_some()
    }

    /// When an OPEN circuit will next admit a probe.
    pub fn open_until(&self, config: &CircuitBreakerConfig) -> Option<DateTime<Utc>> {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened)) => Some(opened + to_chrono(config.cooldown)),
            _ => None,
        }
    }

    /// Admission check. OPEN moves to HALF_OPEN here once the cooldown has
    /// elapsed; in HALF_OPEN only one probe is admitted at a time. A probe
    /// that never reports back is reclaimed after another cooldown.
    pub fn check(
        &mut self,
        config: &CircuitBreakerConfig,
        now: DateTime<Utc>,
    ) -> (Admission, Option<Transition>) {
        let cooldown = to_chrono(config.cooldown);
        match self.state {
            CircuitState::Closed => (Admission::Allowed, None),
            CircuitState::Open => {
                let reopen_at = self.opened_at.unwrap_or(now) + cooldown;
                if now >= reopen_at {
                    let transition =
                        self.transition(CircuitState::HalfOpen, REASON_COOLDOWN_ELAPSED, now);
                    self.probe_started_at = Some(now);
                    (Admission::Probe, Some(transition))
                } else {
                    let retry_after = (reopen_at - now).to_std().unwrap_or_default();
                    (Admission::Rejected { retry_after }, None)
                }
            }
            CircuitState::HalfOpen => match self.probe_started_at {
                Some(started) if now < started + cooldown => (
                    Admission::Rejected {
                        retry_after: (started + cooldown - now).to_std().unwrap_or_default(),
                    },
                    None,
                ),
                _ => {
                    self.probe_started_at = Some(now);
                    (Admission::Probe, None)
                }
            },
        }
    }

    /// Records an invocation. Ignored while HALF_OPEN so the probe itself
    /// never re-trips the circuit.
    pub fn record_trigger(
        &mut self,
        config: &CircuitBreakerConfig,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        if self.state == CircuitState::HalfOpen {
            return None;
        }
        prune(&mut self.trigger_history, Some(config.trigger_window), now);
        push_bounded(&mut self.trigger_history, now);

        match config.trigger_threshold {
            Some(threshold)
                if self.state == CircuitState::Closed
                    && self.trigger_history.len() >= threshold =>
            {
                Some(self.trip(REASON_TOO_FREQUENT, now))
            }
            _ => None,
        }
    }

    /// HALF_OPEN closes and clears both windows; CLOSED clears only the
    /// failure window.
    pub fn record_success(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        match self.state {
            CircuitState::HalfOpen => {
                self.trigger_history.clear();
                self.failure_history.clear();
                self.opened_at = None;
                self.probe_started_at = None;
                Some(self.transition(CircuitState::Closed, REASON_PROBE_SUCCEEDED, now))
            }
            CircuitState::Closed => {
                self.failure_history.clear();
                None
            }
            CircuitState::Open => None,
        }
    }

    pub fn record_failure(
        &mut self,
        config: &CircuitBreakerConfig,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        prune(&mut self.failure_history, config.failure_window, now);
        push_bounded(&mut self.failure_history, now);

        match self.state {
            CircuitState::HalfOpen => Some(self.trip(REASON_PROBE_FAILED, now)),
            CircuitState::Closed if self.failure_history.len() >= config.failure_threshold => {
                Some(self.trip(REASON_TOO_MANY_FAILURES, now))
            }
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            opened_at: self.opened_at,
            trigger_history: self.trigger_history.iter().copied().collect(),
            failure_history: self.failure_history.iter().copied().collect(),
        }
    }

    /// Restores persisted state. An in-flight probe does not survive a restart.
    pub fn from_snapshot(snapshot: CircuitSnapshot) -> Self {
        let opened_at = match snapshot.state {
            CircuitState::Closed => None,
            _ => snapshot.opened_at.or_else(|| Some(Utc::now())),
        };
        Self {
            state: snapshot.state,
            trigger_history: snapshot.trigger_history.into(),
            failure_history: snapshot.failure_history.into(),
            opened_at,
            probe_started_at: None,
        }
    }

    fn trip(&mut self, reason: &'static str, now: DateTime<Utc>) -> Transition {
        self.opened_at = Some(now);
        self.probe_started_at = None;
        self.transition(CircuitState::Open, reason, now)
    }

    fn transition(
        &mut self,
        to: CircuitState,
        reason: &'static str,
        now: DateTime<Utc>,
    ) -> Transition {
        let from = self.state;
        self.state = to;
        Transition {
            from,
            to,
            reason,
            at: now,
        }
    }
}

fn prune(history: &mut VecDeque<DateTime<Utc>>, window: Option<Duration>, now: DateTime<Utc>) {
    if let Some(window) = window {
        let cutoff = now - to_chrono(window);
        while history.front().is_some_and(|ts| *ts < cutoff) {
            history.pop_front();
        }
    }
}

fn push_bounded(history: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
    if history.len() == MAX_HISTORY {
        history.pop_front();
    }
    history.push_back(now);
}

pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            trigger_threshold: Some(3),
            trigger_window: Duration::from_secs(60),
            failure_threshold: 2,
            failure_window: Some(Duration::from_secs(300)),
            cooldown: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_failures_open_then_probe_closes() {
        let cfg = config();
        let t0 = Utc::now();
        let mut cb = CircuitStateMachine::new();

        assert!(cb.record_failure(&cfg, t0).is_none());
        let opened = cb.record_failure(&cfg, t0 + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(opened.to, CircuitState::Open);
        assert_eq!(opened.reason, REASON_TOO_MANY_FAILURES);

        let (admission, _) = cb.check(&cfg, t0 + chrono::Duration::seconds(10));
        assert!(!admission.is_allowed());

        let (admission, transition) = cb.check(&cfg, t0 + chrono::Duration::seconds(31));
        assert_eq!(admission, Admission::Probe);
        assert_eq!(transition.unwrap().to, CircuitState::HalfOpen);

        let closed = cb.record_success(t0 + chrono::Duration::seconds(32)).unwrap();
        assert_eq!(closed.to, CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.trigger_count(), 0);
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let cfg = config();
        let t0 = Utc::now();
        let mut cb = CircuitStateMachine::new();
        cb.record_failure(&cfg, t0);
        cb.record_failure(&cfg, t0);

        let later = t0 + chrono::Duration::seconds(31);
        assert_eq!(cb.check(&cfg, later).0, Admission::Probe);
        assert!(!cb.check(&cfg, later).0.is_allowed());

        // 探测失败后重新打开，冷却重新计时
        let reopened = cb.record_failure(&cfg, later).unwrap();
        assert_eq!(reopened.reason, REASON_PROBE_FAILED);
        assert_eq!(cb.opened_at(), Some(later));
        assert!(!cb.check(&cfg, later + chrono::Duration::seconds(5)).0.is_allowed());
    }

    #[test]
    fn test_triggers_open_and_are_ignored_when_half_open() {
        let cfg = config();
        let t0 = Utc::now();
        let mut cb = CircuitStateMachine::new();
        assert!(cb.record_trigger(&cfg, t0).is_none());
        assert!(cb.record_trigger(&cfg, t0).is_none());
        let opened = cb.record_trigger(&cfg, t0).unwrap();
        assert_eq!(opened.reason, REASON_TOO_FREQUENT);

        cb.check(&cfg, t0 + chrono::Duration::seconds(30));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let before = cb.trigger_count();
        assert!(cb.record_trigger(&cfg, t0 + chrono::Duration::seconds(30)).is_none());
        assert_eq!(cb.trigger_count(), before);
    }

    #[test]
    fn test_success_in_closed_keeps_trigger_history() {
        let cfg = config();
        let t0 = Utc::now();
        let mut cb = CircuitStateMachine::new();
        cb.record_trigger(&cfg, t0);
        cb.record_failure(&cfg, t0);
        assert!(cb.record_success(t0).is_none());
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.trigger_count(), 1);
    }

    #[test]
    fn test_window_expiry_prunes_old_failures() {
        let cfg = config();
        let t0 = Utc::now();
        let mut cb = CircuitStateMachine::new();
        cb.record_failure(&cfg, t0);
        assert!(cb
            .record_failure(&cfg, t0 + chrono::Duration::seconds(301))
            .is_none());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 1);
    }

    #[test]
    fn test_snapshot_restores_open_circuit() {
        let cfg = config();
        let t0 = Utc::now();
        let mut cb = CircuitStateMachine::new();
        cb.record_failure(&cfg, t0);
        cb.record_failure(&cfg, t0);

        let json = serde_json::to_value(cb.snapshot()).unwrap();
        assert_eq!(json["state"], "OPEN");
        assert!(json.get("openedAt").is_some());
        assert_eq!(json["failureHistory"].as_array().unwrap().len(), 2);

        let restored = CircuitStateMachine::from_snapshot(serde_json::from_value(json).unwrap());
        assert_eq!(restored.state(), CircuitState::Open);
        assert_eq!(restored.open_until(&cfg), Some(t0 + chrono::Duration::seconds(30)));
    }
}
