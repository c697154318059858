//! Metrics collector
//!
//! Thin wrapper over `metrics` handles. Without an installed recorder every
//! call is a no-op, so components take the collector as an optional
//! dependency and tests never need an exporter.

use std::time::Duration;

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use resilient_core::{CircuitState, SchedulerStats};

pub struct MetricsCollector {
    // Task lifecycle
    tasks_submitted_total: Counter,
    tasks_completed_total: Counter,
    tasks_failed_total: Counter,
    tasks_timed_out_total: Counter,
    tasks_cancelled_total: Counter,
    task_retries_total: Counter,
    task_duration: Histogram,

    // Engine occupancy
    running_tasks: Gauge,
    queued_tasks: Gauge,
    waiting_tasks: Gauge,

    // Failure containment
    circuit_skips_total: Counter,
    dead_letters_total: Counter,
    provider_failovers_total: Counter,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_submitted_total: counter!("resilient_tasks_submitted_total"),
            tasks_completed_total: counter!("resilient_tasks_completed_total"),
            tasks_failed_total: counter!("resilient_tasks_failed_total"),
            tasks_timed_out_total: counter!("resilient_tasks_timed_out_total"),
            tasks_cancelled_total: counter!("resilient_tasks_cancelled_total"),
            task_retries_total: counter!("resilient_task_retries_total"),
            task_duration: histogram!("resilient_task_duration_seconds"),
            running_tasks: gauge!("resilient_running_tasks"),
            queued_tasks: gauge!("resilient_queued_tasks"),
            waiting_tasks: gauge!("resilient_waiting_tasks"),
            circuit_skips_total: counter!("resilient_circuit_skips_total"),
            dead_letters_total: counter!("resilient_dead_letters_total"),
            provider_failovers_total: counter!("resilient_provider_failovers_total"),
        }
    }

    pub fn record_task_submitted(&self) {
        self.tasks_submitted_total.increment(1);
    }

    pub fn record_task_completed(&self, duration: Duration) {
        self.tasks_completed_total.increment(1);
        self.task_duration.record(duration.as_secs_f64());
    }

    pub fn record_task_failed(&self) {
        self.tasks_failed_total.increment(1);
    }

    pub fn record_task_timed_out(&self) {
        self.tasks_timed_out_total.increment(1);
    }

    pub fn record_task_cancelled(&self) {
        self.tasks_cancelled_total.increment(1);
    }

    pub fn record_task_retry(&self) {
        self.task_retries_total.increment(1);
    }

    /// Mirror the occupancy part of a stats snapshot
    pub fn update_occupancy(&self, stats: &SchedulerStats) {
        self.running_tasks.set(stats.running as f64);
        self.queued_tasks.set(stats.queued as f64);
        self.waiting_tasks.set(stats.waiting as f64);
    }

    pub fn record_circuit_transition(&self, key: &str, to: CircuitState) {
        counter!(
            "resilient_circuit_transitions_total",
            "key" => key.to_string(),
            "to" => to.to_string()
        )
        .increment(1);
    }

    pub fn record_circuit_skip(&self) {
        self.circuit_skips_total.increment(1);
    }

    pub fn record_provider_attempt(&self, provider: &str, success: bool) {
        counter!(
            "resilient_provider_attempts_total",
            "provider" => provider.to_string(),
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);
    }

    pub fn record_provider_failover(&self) {
        self.provider_failovers_total.increment(1);
    }

    pub fn record_dead_letter(&self) {
        self.dead_letters_total.increment(1);
    }
}
