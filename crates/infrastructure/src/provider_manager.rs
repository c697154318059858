//! Multi-provider failover
//!
//! Runs a unit of work against an ordered list of providers. Each provider has
//! an embedded consecutive-failure circuit built on the same state machine as
//! the keyed [`CircuitBreaker`](crate::circuit_breaker::CircuitBreaker), its
//! own retry budget with exponential backoff, and a per-attempt timeout. When
//! every provider is exhausted or skipped the work item is dead-lettered.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use resilient_core::config::FailoverSettings;
use resilient_core::{
    is_retryable_error, BackoffConfig, CircuitBreakerConfig, CircuitState, CircuitStateMachine,
    ProviderConfig, ProviderStatus, SchedulerError, SchedulerResult, Transition,
};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::dead_letter::DeadLetterQueue;
use crate::observability::{MetricsCollector, StructuredLogger};

/// Arguments handed to the work function for one attempt
#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub provider: String,
    pub kind: String,
    pub payload: serde_json::Value,
    /// Attempt number against this provider, starting at 0
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailoverConfig {
    pub backoff: BackoffConfig,
    pub provider_circuit: CircuitBreakerConfig,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            provider_circuit: CircuitBreakerConfig::consecutive_failures(
                3,
                Duration::from_secs(300),
            ),
        }
    }
}

impl From<&FailoverSettings> for FailoverConfig {
    fn from(settings: &FailoverSettings) -> Self {
        Self {
            backoff: settings.backoff(),
            provider_circuit: settings.provider_circuit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailoverOutcome<T> {
    pub result: T,
    pub provider: String,
    /// Attempts made against the provider that succeeded
    pub attempts: u32,
}

struct ProviderEntry {
    config: ProviderConfig,
    circuit: Arc<Mutex<CircuitStateMachine>>,
}

pub struct ProviderManager {
    providers: RwLock<Vec<ProviderEntry>>,
    config: FailoverConfig,
    dead_letters: Arc<DeadLetterQueue>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ProviderManager {
    pub fn new(
        providers: Vec<ProviderConfig>,
        config: FailoverConfig,
        dead_letters: Arc<DeadLetterQueue>,
    ) -> SchedulerResult<Self> {
        validate_providers(&providers)?;
        let entries = build_entries(providers, &mut HashMap::new());
        Ok(Self {
            providers: RwLock::new(entries),
            config,
            dead_letters,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    /// Tries enabled providers in ascending priority until one succeeds.
    /// On total failure the item is appended to the dead-letter queue before
    /// `AllProvidersFailed` is returned.
    pub async fn execute_with_failover<T, F, Fut>(
        &self,
        kind: &str,
        payload: serde_json::Value,
        f: F,
    ) -> SchedulerResult<FailoverOutcome<T>>
    where
        F: Fn(ProviderCall) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match self.run_failover(kind, &payload, &f).await {
            Ok(outcome) => Ok(outcome),
            Err(errors) => {
                let error = join_errors(&errors);
                let entry = self.dead_letters.push(kind, payload, &error).await?;
                StructuredLogger::log_dead_letter_recorded(&entry.id, kind, &error);
                if let Some(metrics) = &self.metrics {
                    metrics.record_dead_letter();
                }
                Err(SchedulerError::AllProvidersFailed {
                    kind: kind.to_string(),
                    dead_letter_id: entry.id,
                    errors,
                })
            }
        }
    }

    /// Re-runs a dead-lettered item. The entry is removed on success and kept
    /// with the new error trail otherwise; no second entry is created.
    pub async fn replay_dead_letter<T, F, Fut>(
        &self,
        id: &str,
        f: F,
    ) -> SchedulerResult<FailoverOutcome<T>>
    where
        F: Fn(ProviderCall) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let entry = self.dead_letters.begin_replay(id).await?;

        match self.run_failover(&entry.kind, &entry.payload, &f).await {
            Ok(outcome) => {
                self.dead_letters.remove(id).await?;
                StructuredLogger::log_dead_letter_replayed(id, entry.retry_count, true);
                Ok(outcome)
            }
            Err(errors) => {
                self.dead_letters
                    .record_replay_failure(id, &join_errors(&errors))
                    .await?;
                StructuredLogger::log_dead_letter_replayed(id, entry.retry_count, false);
                Err(SchedulerError::AllProvidersFailed {
                    kind: entry.kind,
                    dead_letter_id: entry.id,
                    errors,
                })
            }
        }
    }

    async fn run_failover<T, F, Fut>(
        &self,
        kind: &str,
        payload: &serde_json::Value,
        f: &F,
    ) -> Result<FailoverOutcome<T>, Vec<String>>
    where
        F: Fn(ProviderCall) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let providers: Vec<(ProviderConfig, Arc<Mutex<CircuitStateMachine>>)> = self
            .providers
            .read()
            .await
            .iter()
            .filter(|p| p.config.enabled)
            .map(|p| (p.config.clone(), Arc::clone(&p.circuit)))
            .collect();

        let mut errors = Vec::new();
        if providers.is_empty() {
            errors.push("没有启用的提供者".to_string());
            return Err(errors);
        }

        for (provider, circuit) in providers {
            let name = provider.name.as_str();

            let admitted = {
                let mut machine = circuit.lock().await;
                let (admission, transition) =
                    machine.check(&self.config.provider_circuit, Utc::now());
                self.observe_transition(name, transition);
                admission.is_allowed()
            };
            if !admitted {
                errors.push(format!("{name}: 熔断器已打开，跳过"));
                StructuredLogger::log_provider_failover(name, kind, "circuit open");
                continue;
            }

            let attempts = provider.attempts();
            for attempt in 0..attempts {
                let call = ProviderCall {
                    provider: provider.name.clone(),
                    kind: kind.to_string(),
                    payload: payload.clone(),
                    attempt,
                };

                let message = match tokio::time::timeout(provider.timeout(), f(call)).await {
                    Ok(Ok(result)) => {
                        let transition = circuit.lock().await.record_success(Utc::now());
                        self.observe_transition(name, transition);
                        if let Some(metrics) = &self.metrics {
                            metrics.record_provider_attempt(name, true);
                        }
                        StructuredLogger::log_provider_succeeded(name, kind, attempt + 1);
                        return Ok(FailoverOutcome {
                            result,
                            provider: provider.name,
                            attempts: attempt + 1,
                        });
                    }
                    Ok(Err(e)) => format!("{e:#}"),
                    Err(_) => format!(
                        "provider timed out after {}ms",
                        provider.timeout().as_millis()
                    ),
                };

                let tripped = {
                    let transition = circuit
                        .lock()
                        .await
                        .record_failure(&self.config.provider_circuit, Utc::now());
                    let tripped = transition
                        .as_ref()
                        .is_some_and(|t| t.to == CircuitState::Open);
                    self.observe_transition(name, transition);
                    tripped
                };

                let retryable = is_retryable_error(&message);
                StructuredLogger::log_provider_attempt_failed(
                    name, kind, attempt, retryable, &message,
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_provider_attempt(name, false);
                }
                errors.push(format!("{name} (attempt {}): {message}", attempt + 1));

                // 不可重试的错误或熔断已打开：直接转移到下一个提供者
                if !retryable || tripped {
                    break;
                }
                if attempt + 1 < attempts {
                    tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                }
            }

            StructuredLogger::log_provider_failover(name, kind, "attempts exhausted");
            if let Some(metrics) = &self.metrics {
                metrics.record_provider_failover();
            }
        }

        Err(errors)
    }

    /// Replaces the provider list. Circuits of providers that keep their name
    /// survive the reload.
    pub async fn reload(&self, providers: Vec<ProviderConfig>) -> SchedulerResult<()> {
        validate_providers(&providers)?;
        let mut current = self.providers.write().await;
        let mut circuits: HashMap<String, Arc<Mutex<CircuitStateMachine>>> = current
            .drain(..)
            .map(|p| (p.config.name, p.circuit))
            .collect();
        *current = build_entries(providers, &mut circuits);
        info!(providers = current.len(), "提供者配置已重新加载");
        Ok(())
    }

    pub async fn status(&self) -> Vec<ProviderStatus> {
        let providers: Vec<(ProviderConfig, Arc<Mutex<CircuitStateMachine>>)> = self
            .providers
            .read()
            .await
            .iter()
            .map(|p| (p.config.clone(), Arc::clone(&p.circuit)))
            .collect();

        let mut status = Vec::with_capacity(providers.len());
        for (config, circuit) in providers {
            let machine = circuit.lock().await;
            status.push(ProviderStatus {
                name: config.name,
                priority: config.priority,
                enabled: config.enabled,
                failure_count: machine.failure_count(),
                circuit_state: machine.state(),
                open_until: machine.open_until(&self.config.provider_circuit),
            });
        }
        status
    }

    pub async fn provider_status(&self, name: &str) -> Option<ProviderStatus> {
        self.status().await.into_iter().find(|s| s.name == name)
    }

    /// Operator action: close every provider circuit.
    pub async fn reset_circuits(&self) {
        for provider in self.providers.read().await.iter() {
            provider.circuit.lock().await.reset();
        }
        info!("所有提供者熔断状态已重置");
    }

    fn observe_transition(&self, provider: &str, transition: Option<Transition>) {
        if let Some(transition) = transition {
            let key = format!("provider:{provider}");
            StructuredLogger::log_circuit_transition(
                &key,
                transition.from,
                transition.to,
                transition.reason,
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_circuit_transition(&key, transition.to);
            }
        }
    }
}

fn validate_providers(providers: &[ProviderConfig]) -> SchedulerResult<()> {
    let mut names = HashSet::new();
    for provider in providers {
        provider
            .validate()
            .map_err(|e| SchedulerError::Configuration(e.to_string()))?;
        if !names.insert(provider.name.as_str()) {
            return Err(SchedulerError::Configuration(format!(
                "提供者名称重复: {}",
                provider.name
            )));
        }
    }
    Ok(())
}

/// Sorted by ascending priority; equal priorities keep configuration order.
fn build_entries(
    mut providers: Vec<ProviderConfig>,
    circuits: &mut HashMap<String, Arc<Mutex<CircuitStateMachine>>>,
) -> Vec<ProviderEntry> {
    providers.sort_by_key(|p| p.priority);
    providers
        .into_iter()
        .map(|config| {
            let circuit = circuits.remove(&config.name).unwrap_or_default();
            ProviderEntry { config, circuit }
        })
        .collect()
}

fn join_errors(errors: &[String]) -> String {
    errors.join("; ")
}
