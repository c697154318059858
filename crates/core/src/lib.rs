pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod models;
pub mod retry;
pub mod traits;

pub use circuit_breaker::{
    Admission, CircuitBreakerConfig, CircuitSnapshot, CircuitState, CircuitStateMachine,
    Transition,
};
pub use config::AppConfig;
pub use errors::*;
pub use models::{
    DeadLetterEntry, ProviderConfig, ProviderStatus, SchedulerStats, Task, TaskFn, TaskId,
    TaskOutput, TaskRunResult, TaskSpec, TaskState,
};
pub use retry::{is_retryable_error, BackoffConfig};
pub use traits::{ExecutionRequest, PolicyKind, SchedulingPolicy, TaskExecutor};
