//! Structured logging utilities
//!
//! Every lifecycle event of the engine is emitted through one of these helpers
//! so that field names stay consistent across the scheduler, the circuit
//! breaker and the provider manager.

use std::time::Duration;

use resilient_core::{CircuitState, TaskState};
use tracing::{debug, error, info, warn};

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log task submission
    pub fn log_task_submitted(task_id: &str, state: TaskState, dependencies: usize) {
        debug!(
            event = "task_submitted",
            task.id = task_id,
            task.state = %state,
            task.dependencies = dependencies,
            "Task submitted"
        );
    }

    /// Log a dispatch to the worker pool
    pub fn log_task_dispatched(task_id: &str, attempt: u32, policy: &str) {
        debug!(
            event = "task_dispatched",
            task.id = task_id,
            task.attempt = attempt,
            scheduler.policy = policy,
            "Task dispatched"
        );
    }

    pub fn log_task_completed(task_id: &str, attempt: u32, duration: Duration) {
        info!(
            event = "task_completed",
            task.id = task_id,
            task.attempt = attempt,
            task.duration_ms = duration.as_millis() as u64,
            "Task completed"
        );
    }

    /// Log an in-place retry
    pub fn log_task_retry(task_id: &str, retry_count: u32, max_retries: u32, reason: &str) {
        warn!(
            event = "task_retry",
            task.id = task_id,
            task.retry_count = retry_count,
            task.max_retries = max_retries,
            error = reason,
            "Task re-queued for retry"
        );
    }

    pub fn log_task_failed(task_id: &str, retry_count: u32, error_message: &str) {
        error!(
            event = "task_failed",
            task.id = task_id,
            task.retry_count = retry_count,
            error = error_message,
            "Task failed permanently"
        );
    }

    pub fn log_task_timed_out(task_id: &str, retry_count: u32, timeout: Duration) {
        error!(
            event = "task_timed_out",
            task.id = task_id,
            task.retry_count = retry_count,
            task.timeout_ms = timeout.as_millis() as u64,
            "Task timed out permanently"
        );
    }

    pub fn log_task_cancelled(task_id: &str, previous: TaskState) {
        info!(
            event = "task_cancelled",
            task.id = task_id,
            task.previous_state = %previous,
            "Task cancelled"
        );
    }

    /// Log a circuit state change
    pub fn log_circuit_transition(key: &str, from: CircuitState, to: CircuitState, reason: &str) {
        let level_is_open = to == CircuitState::Open;
        if level_is_open {
            warn!(
                event = "circuit_transition",
                circuit.key = key,
                circuit.from = %from,
                circuit.to = %to,
                reason = reason,
                "Circuit opened"
            );
        } else {
            info!(
                event = "circuit_transition",
                circuit.key = key,
                circuit.from = %from,
                circuit.to = %to,
                reason = reason,
                "Circuit state changed"
            );
        }
    }

    /// Log a call refused by an open circuit
    pub fn log_circuit_skipped(key: &str, retry_after: Duration) {
        warn!(
            event = "circuit_skipped",
            circuit.key = key,
            circuit.retry_after_ms = retry_after.as_millis() as u64,
            "Action skipped, circuit is open"
        );
    }

    pub fn log_provider_attempt_failed(
        provider: &str,
        kind: &str,
        attempt: u32,
        retryable: bool,
        error_message: &str,
    ) {
        warn!(
            event = "provider_attempt_failed",
            provider.name = provider,
            work.kind = kind,
            attempt = attempt,
            retryable = retryable,
            error = error_message,
            "Provider attempt failed"
        );
    }

    pub fn log_provider_failover(from: &str, kind: &str, reason: &str) {
        warn!(
            event = "provider_failover",
            provider.name = from,
            work.kind = kind,
            reason = reason,
            "Failing over to next provider"
        );
    }

    pub fn log_provider_succeeded(provider: &str, kind: &str, attempts: u32) {
        debug!(
            event = "provider_succeeded",
            provider.name = provider,
            work.kind = kind,
            attempts = attempts,
            "Provider call succeeded"
        );
    }

    pub fn log_dead_letter_recorded(entry_id: &str, kind: &str, error_message: &str) {
        error!(
            event = "dead_letter_recorded",
            dead_letter.id = entry_id,
            work.kind = kind,
            error = error_message,
            "All providers failed, work item dead-lettered"
        );
    }

    pub fn log_dead_letter_replayed(entry_id: &str, retry_count: u32, succeeded: bool) {
        info!(
            event = "dead_letter_replayed",
            dead_letter.id = entry_id,
            dead_letter.retry_count = retry_count,
            succeeded = succeeded,
            "Dead letter replayed"
        );
    }

    /// Log system error with context
    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            component = component,
            operation = operation,
            error.message = %error,
            error.source = ?error.source(),
            "System error occurred"
        );
    }
}
