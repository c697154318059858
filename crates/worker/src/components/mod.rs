pub mod task_execution;

pub use task_execution::{ExecutionOutcome, TaskExecutionManager};
