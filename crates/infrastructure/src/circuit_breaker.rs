//! Keyed circuit breaker
//!
//! Guards repeated invocation of a `(trigger_type, action_id)` pair. Each key
//! owns its own lock; the outer map lock is only taken to look up or insert a
//! key, so unrelated keys never contend. Every transition is persisted through
//! the configured [`CircuitStateStore`] before the call returns, and only while
//! the machine is still the live entry for its key: a machine dropped by
//! [`CircuitBreaker::reset_all`] never writes again.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use resilient_core::{
    Admission, CircuitBreakerConfig, CircuitSnapshot, CircuitState, CircuitStateMachine,
    SchedulerError, SchedulerResult, Transition,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::circuit_store::{CircuitStateStore, InMemoryCircuitStateStore};
use crate::observability::{MetricsCollector, StructuredLogger};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CircuitKey {
    pub trigger_type: String,
    pub action_id: String,
}

impl CircuitKey {
    pub fn new(trigger_type: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self {
            trigger_type: trigger_type.into(),
            action_id: action_id.into(),
        }
    }

    /// Parses the persisted `"trigger_type:action_id"` form
    pub fn parse(s: &str) -> Option<Self> {
        let (trigger_type, action_id) = s.split_once(':')?;
        Some(Self::new(trigger_type, action_id))
    }
}

impl fmt::Display for CircuitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.trigger_type, self.action_id)
    }
}

/// Per-key view for the administrative status dump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStatus {
    pub key: String,
    pub state: CircuitState,
    pub opened_at: Option<DateTime<Utc>>,
    pub open_until: Option<DateTime<Utc>>,
    pub trigger_count: usize,
    pub failure_count: usize,
}

type SharedCircuit = Arc<Mutex<CircuitStateMachine>>;

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: RwLock<HashMap<CircuitKey, SharedCircuit>>,
    store: Arc<dyn CircuitStateStore>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Breaker with in-memory persistence only
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: RwLock::new(HashMap::new()),
            store: Arc::new(InMemoryCircuitStateStore::new()),
            metrics: None,
        }
    }

    /// Breaker restored from, and persisting to, `store`
    pub async fn with_store(
        config: CircuitBreakerConfig,
        store: Arc<dyn CircuitStateStore>,
    ) -> SchedulerResult<Self> {
        let mut circuits = HashMap::new();
        for (raw_key, snapshot) in store.load().await? {
            match CircuitKey::parse(&raw_key) {
                Some(key) => {
                    let machine = CircuitStateMachine::from_snapshot(snapshot);
                    circuits.insert(key, Arc::new(Mutex::new(machine)));
                }
                None => warn!(key = %raw_key, "忽略无法解析的熔断状态键"),
            }
        }

        Ok(Self {
            config,
            circuits: RwLock::new(circuits),
            store,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    async fn circuit(&self, key: &CircuitKey) -> SharedCircuit {
        if let Some(circuit) = self.circuits.read().await.get(key) {
            return Arc::clone(circuit);
        }
        let mut circuits = self.circuits.write().await;
        Arc::clone(circuits.entry(key.clone()).or_default())
    }

    /// `true` when the caller may act. An OPEN circuit whose cooldown has
    /// elapsed moves to HALF_OPEN and admits exactly one probe.
    pub async fn check(&self, key: &CircuitKey) -> SchedulerResult<bool> {
        Ok(self.check_detailed(key).await?.is_allowed())
    }

    pub async fn check_detailed(&self, key: &CircuitKey) -> SchedulerResult<Admission> {
        let circuit = self.circuit(key).await;
        let mut machine = circuit.lock().await;
        let (admission, transition) = machine.check(&self.config, Utc::now());
        self.commit(key, &circuit, &machine, transition).await?;

        if let Admission::Rejected { retry_after } = admission {
            StructuredLogger::log_circuit_skipped(&key.to_string(), retry_after);
            if let Some(metrics) = &self.metrics {
                metrics.record_circuit_skip();
            }
        }
        Ok(admission)
    }

    pub async fn record_trigger(&self, key: &CircuitKey) -> SchedulerResult<()> {
        let circuit = self.circuit(key).await;
        let mut machine = circuit.lock().await;
        let transition = machine.record_trigger(&self.config, Utc::now());
        self.commit(key, &circuit, &machine, transition).await
    }

    pub async fn record_success(&self, key: &CircuitKey) -> SchedulerResult<()> {
        let circuit = self.circuit(key).await;
        let mut machine = circuit.lock().await;
        let transition = machine.record_success(Utc::now());
        self.commit(key, &circuit, &machine, transition).await
    }

    pub async fn record_failure(&self, key: &CircuitKey) -> SchedulerResult<()> {
        let circuit = self.circuit(key).await;
        let mut machine = circuit.lock().await;
        let transition = machine.record_failure(&self.config, Utc::now());
        self.commit(key, &circuit, &machine, transition).await
    }

    /// Check, record the trigger, run `operation` and report its outcome.
    pub async fn execute<F, Fut, T>(&self, key: &CircuitKey, operation: F) -> SchedulerResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SchedulerResult<T>>,
    {
        if !self.check(key).await? {
            return Err(SchedulerError::CircuitOpen {
                key: key.to_string(),
            });
        }
        self.record_trigger(key).await?;

        match operation().await {
            Ok(value) => {
                self.record_success(key).await?;
                Ok(value)
            }
            Err(error) => {
                self.record_failure(key).await?;
                Err(error)
            }
        }
    }

    pub async fn state(&self, key: &CircuitKey) -> CircuitState {
        let circuit = self.circuits.read().await.get(key).cloned();
        match circuit {
            Some(circuit) => circuit.lock().await.state(),
            None => CircuitState::Closed,
        }
    }

    pub async fn snapshot(&self, key: &CircuitKey) -> Option<CircuitSnapshot> {
        let circuit = self.circuits.read().await.get(key).cloned()?;
        let machine = circuit.lock().await;
        Some(machine.snapshot())
    }

    pub async fn status(&self) -> Vec<CircuitStatus> {
        let circuits: Vec<(CircuitKey, SharedCircuit)> = self
            .circuits
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        let mut status = Vec::with_capacity(circuits.len());
        for (key, circuit) in circuits {
            let machine = circuit.lock().await;
            status.push(CircuitStatus {
                key: key.to_string(),
                state: machine.state(),
                opened_at: machine.opened_at(),
                open_until: machine.open_until(&self.config),
                trigger_count: machine.trigger_count(),
                failure_count: machine.failure_count(),
            });
        }
        status.sort_by(|a, b| a.key.cmp(&b.key));
        status
    }

    /// Operator action: forget every circuit and clear persisted state.
    pub async fn reset_all(&self) -> SchedulerResult<()> {
        let dropped = {
            let mut circuits = self.circuits.write().await;
            let dropped = std::mem::take(&mut *circuits);
            self.store.clear().await?;
            dropped
        };
        // Callers still holding a dropped machine see it closed
        for circuit in dropped.values() {
            circuit.lock().await.reset();
        }
        warn!(event = "circuit_reset", "所有熔断状态已被重置");
        Ok(())
    }

    async fn commit(
        &self,
        key: &CircuitKey,
        circuit: &SharedCircuit,
        machine: &CircuitStateMachine,
        transition: Option<Transition>,
    ) -> SchedulerResult<()> {
        let Some(transition) = transition else {
            return Ok(());
        };
        let key_str = key.to_string();
        StructuredLogger::log_circuit_transition(
            &key_str,
            transition.from,
            transition.to,
            transition.reason,
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_circuit_transition(&key_str, transition.to);
        }

        // Held across the write so a reset cannot clear the store in between
        let circuits = self.circuits.read().await;
        match circuits.get(key) {
            Some(live) if Arc::ptr_eq(live, circuit) => {
                self.store.save(&key_str, &machine.snapshot()).await
            }
            _ => {
                debug!(key = %key_str, "熔断状态已被重置，跳过持久化");
                Ok(())
            }
        }
    }
}
