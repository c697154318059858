use std::sync::Arc;

use anyhow::{Context, Result};
use resilient_core::{
    config::AppConfig,
    models::{DeadLetterEntry, ProviderStatus, SchedulerStats},
    traits::TaskExecutor,
};
use resilient_dispatcher::{LoggingListener, MetricsListener, Scheduler};
use resilient_infrastructure::{
    CircuitBreaker, CircuitStatus, DeadLetterQueue, FailoverConfig, FileCircuitStateStore,
    MetricsCollector, ProviderManager,
};
use resilient_worker::InProcessExecutor;
use serde::Serialize;
use tracing::info;

/// 管理接口输出的系统状态
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub policy: String,
    pub accepting: bool,
    pub scheduler: SchedulerStats,
    pub circuits: Vec<CircuitStatus>,
    pub providers: Vec<ProviderStatus>,
    pub dead_letters: Vec<DeadLetterEntry>,
}

/// 主应用程序
///
/// 按配置显式组装调度器、熔断器、死信队列与提供者管理器，不使用全局单例。
pub struct Application {
    config: AppConfig,
    scheduler: Scheduler,
    circuit_breaker: Arc<CircuitBreaker>,
    providers: Arc<ProviderManager>,
    dead_letters: Arc<DeadLetterQueue>,
}

impl Application {
    /// 使用进程内执行器创建应用实例
    pub async fn new(config: AppConfig) -> Result<Self> {
        Self::with_executor(config, Arc::new(InProcessExecutor::new())).await
    }

    pub async fn with_executor(config: AppConfig, executor: Arc<dyn TaskExecutor>) -> Result<Self> {
        config.validate().context("配置验证失败")?;
        info!(
            "初始化应用程序: policy={}, providers={}",
            config.scheduler.policy,
            config.providers.len()
        );

        let metrics = config
            .logging
            .metrics_enabled
            .then(|| Arc::new(MetricsCollector::new()));

        let mut circuit_breaker = match &config.circuit_breaker.state_path {
            Some(path) => {
                let store = Arc::new(FileCircuitStateStore::new(path));
                CircuitBreaker::with_store(config.circuit_breaker.to_runtime(), store)
                    .await
                    .with_context(|| format!("加载熔断器状态失败: {path}"))?
            }
            None => CircuitBreaker::new(config.circuit_breaker.to_runtime()),
        };

        let dead_letters = Arc::new(match &config.dead_letter.log_path {
            Some(path) => DeadLetterQueue::open(path, config.dead_letter.max_retries)
                .await
                .with_context(|| format!("打开死信日志失败: {path}"))?,
            None => DeadLetterQueue::in_memory(config.dead_letter.max_retries),
        });

        let mut providers = ProviderManager::new(
            config.providers.clone(),
            FailoverConfig::from(&config.failover),
            Arc::clone(&dead_letters),
        )
        .context("创建提供者管理器失败")?;

        let mut scheduler = Scheduler::from_config(config.scheduler.clone(), executor)
            .with_listener(Arc::new(LoggingListener));

        if let Some(metrics) = &metrics {
            circuit_breaker = circuit_breaker.with_metrics(Arc::clone(metrics));
            providers = providers.with_metrics(Arc::clone(metrics));
            let listener = MetricsListener::new(Arc::clone(metrics));
            scheduler = scheduler.with_listener(Arc::new(listener));
        }

        Ok(Self {
            config,
            scheduler,
            circuit_breaker: Arc::new(circuit_breaker),
            providers: Arc::new(providers),
            dead_letters,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn providers(&self) -> &Arc<ProviderManager> {
        &self.providers
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    /// 当前熔断、提供者与队列状态
    pub async fn status(&self) -> SystemStatus {
        SystemStatus {
            policy: self.config.scheduler.policy.to_string(),
            accepting: self.scheduler.is_accepting(),
            scheduler: self.scheduler.get_stats().await,
            circuits: self.circuit_breaker.status().await,
            providers: self.providers.status().await,
            dead_letters: self.dead_letters.list().await,
        }
    }

    /// 清除全部熔断状态（按键熔断器与提供者熔断器），仅供运维使用
    pub async fn reset(&self) -> Result<()> {
        self.circuit_breaker
            .reset_all()
            .await
            .context("重置熔断器状态失败")?;
        self.providers.reset_circuits().await;
        info!("已重置全部熔断状态");
        Ok(())
    }

    /// 停止接收任务，`wait` 为真时等待运行中的任务结束
    pub async fn shutdown(&self, wait: bool) -> Result<SchedulerStats> {
        self.scheduler
            .shutdown(wait)
            .await
            .context("关闭调度器失败")
    }
}
