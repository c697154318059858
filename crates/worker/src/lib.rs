pub mod components;
pub mod executors;


pub use components::{ExecutionOutcome, TaskExecutionManager};
pub use executors::InProcessExecutor;
