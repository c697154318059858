//! Task scheduling engine
//!
//! Owns the task graph, the pluggable scheduling policies, in-place retries
//! and the coordinator that drives the bounded worker pool.

pub mod dependency_checker;
pub mod retry_service;
pub mod scheduler;
pub mod state_listener;
pub mod strategies;
pub mod task_graph;

#[cfg(test)]
pub mod test_utils;


pub use dependency_checker::{DependencyCheckResult, DependencyChecker};
pub use retry_service::{RetryDecision, TaskFailure, TaskRetryService};
pub use scheduler::Scheduler;
pub use state_listener::{LoggingListener, MetricsListener, TaskEvent, TaskEventListener};
pub use strategies::*;
pub use task_graph::{Dispatch, Submission, TaskDefaults, TaskGraph};
