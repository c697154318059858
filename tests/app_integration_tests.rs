//! End-to-end tests for the composition root: scheduler, circuit breaker,
//! provider failover and the dead-letter log wired together from `AppConfig`.

use std::time::Duration;

use anyhow::Result;
use resilient_core::{
    AppConfig, CircuitState, PolicyKind, ProviderConfig, SchedulerError, TaskSpec,
};
use resilient_infrastructure::CircuitKey;
use resilient_scheduler::Application;
use serde_json::json;
use tempfile::TempDir;

fn persistent_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.circuit_breaker.state_path = Some(
        dir.path()
            .join("circuit_state.json")
            .to_string_lossy()
            .into_owned(),
    );
    config.dead_letter.log_path = Some(
        dir.path()
            .join("dead_letters.jsonl")
            .to_string_lossy()
            .into_owned(),
    );
    config.failover.base_interval_ms = 1;
    config.failover.max_interval_ms = 5;
    config.providers = vec![ProviderConfig::new("primary", 1).with_max_retries(2)];
    config.logging.metrics_enabled = false;
    config
}

#[tokio::test]
async fn test_sample_config_loads() -> Result<()> {
    let config = AppConfig::load(Some("config/resilient.toml"))?;
    assert_eq!(config.scheduler.policy, PolicyKind::Priority);
    assert_eq!(config.providers.len(), 3);
    assert!(!config.providers[2].enabled);
    Ok(())
}

#[tokio::test]
async fn test_status_reports_scheduler_activity() -> Result<()> {
    let app = Application::new(AppConfig::default()).await?;

    let scheduler = app.scheduler();
    let first = scheduler
        .submit(
            TaskSpec::from_fn(|| async { Ok::<_, anyhow::Error>(json!("first")) })
                .with_id("first"),
        )
        .await?;
    scheduler
        .submit(
            TaskSpec::from_fn(|| async { Ok::<_, anyhow::Error>(json!("second")) })
                .with_id("second")
                .depends_on([first]),
        )
        .await?;

    let stats = app.shutdown(true).await?;
    assert_eq!(stats.completed, 2);

    let status = app.status().await;
    assert!(!status.accepting);
    assert_eq!(status.policy, "fifo");
    assert_eq!(status.scheduler.completed, 2);

    let value = serde_json::to_value(&status)?;
    assert!(value.get("circuits").is_some());
    assert!(value.get("dead_letters").is_some());
    assert_eq!(value["scheduler"]["submitted"], json!(2));
    Ok(())
}

#[tokio::test]
async fn test_circuit_and_dead_letter_state_survive_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let key = CircuitKey::new("restart", "web-1");

    {
        let app = Application::new(persistent_config(&dir)).await?;
        for _ in 0..3 {
            app.circuit_breaker().record_failure(&key).await?;
        }
        assert!(!app.circuit_breaker().check(&key).await?);

        let result = app
            .providers()
            .execute_with_failover("notify", json!({"to": "ops"}), |_call| async {
                Err::<(), _>(anyhow::anyhow!("503 service unavailable"))
            })
            .await;
        assert!(matches!(
            result,
            Err(SchedulerError::AllProvidersFailed { .. })
        ));
    }

    let app = Application::new(persistent_config(&dir)).await?;
    let status = app.status().await;
    assert_eq!(status.circuits.len(), 1);
    assert_eq!(status.circuits[0].key, "restart:web-1");
    assert_eq!(status.circuits[0].state, CircuitState::Open);
    assert_eq!(status.dead_letters.len(), 1);
    assert_eq!(status.dead_letters[0].kind, "notify");
    assert_eq!(status.dead_letters[0].retry_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_reset_clears_every_circuit() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = persistent_config(&dir);
    config.failover.provider_failure_threshold = 1;
    config.providers = vec![ProviderConfig::new("primary", 1).with_max_retries(1)];
    let app = Application::new(config.clone()).await?;

    let key = CircuitKey::new("reset", "db");
    for _ in 0..3 {
        app.circuit_breaker().record_failure(&key).await?;
    }
    let _ = app
        .providers()
        .execute_with_failover("sync", json!(null), |_call| async {
            Err::<(), _>(anyhow::anyhow!("timeout"))
        })
        .await;
    let before = app.status().await;
    assert_eq!(before.providers[0].circuit_state, CircuitState::Open);

    app.reset().await?;
    let after = app.status().await;
    assert!(after.circuits.is_empty());
    assert_eq!(after.providers[0].circuit_state, CircuitState::Closed);
    assert_eq!(after.providers[0].failure_count, 0);

    // 重置后的状态同样被持久化
    let reopened = Application::new(config).await?;
    assert!(reopened.status().await.circuits.is_empty());

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        reopened
            .providers()
            .execute_with_failover("sync", json!(null), |call| async move {
                Ok::<_, anyhow::Error>(call.provider)
            }),
    )
    .await??;
    assert_eq!(outcome.provider, "primary");
    Ok(())
}
