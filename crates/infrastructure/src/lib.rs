pub mod circuit_breaker;
pub mod circuit_store;
pub mod dead_letter;
pub mod observability;
pub mod provider_manager;

pub use circuit_breaker::{CircuitBreaker, CircuitKey, CircuitStatus};
pub use circuit_store::{CircuitStateStore, FileCircuitStateStore, InMemoryCircuitStateStore};
pub use dead_letter::DeadLetterQueue;
pub use observability::*;
pub use provider_manager::{FailoverConfig, FailoverOutcome, ProviderCall, ProviderManager};
