pub mod app_config;
pub mod observability;
pub mod resilience;
pub mod scheduler;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use observability::LoggingConfig;
pub use resilience::{CircuitBreakerSettings, DeadLetterSettings, FailoverSettings};
pub use scheduler::SchedulerConfig;
