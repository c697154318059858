use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::BackoffConfig;

/// 熔断器配置（按 触发类型:动作 分键）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// 窗口内触发次数上限，0 表示不限制触发频率
    pub trigger_threshold: usize,
    pub trigger_window_seconds: u64,
    pub failure_threshold: usize,
    /// 0 表示统计连续失败
    pub failure_window_seconds: u64,
    pub cooldown_seconds: u64,
    /// 熔断状态快照文件，未设置时只保存在内存中
    pub state_path: Option<String>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            trigger_threshold: 5,
            trigger_window_seconds: 300,
            failure_threshold: 3,
            failure_window_seconds: 300,
            cooldown_seconds: 300,
            state_path: None,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_runtime(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            trigger_threshold: (self.trigger_threshold > 0).then_some(self.trigger_threshold),
            trigger_window: Duration::from_secs(self.trigger_window_seconds),
            failure_threshold: self.failure_threshold,
            failure_window: (self.failure_window_seconds > 0)
                .then(|| Duration::from_secs(self.failure_window_seconds)),
            cooldown: Duration::from_secs(self.cooldown_seconds),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.failure_threshold == 0 {
            return Err(anyhow::anyhow!("熔断失败阈值必须大于0"));
        }

        if self.trigger_threshold > 0 && self.trigger_window_seconds == 0 {
            return Err(anyhow::anyhow!("启用触发频率限制时窗口必须大于0"));
        }

        if self.cooldown_seconds == 0 {
            return Err(anyhow::anyhow!("熔断冷却时间必须大于0"));
        }

        Ok(())
    }
}

/// 故障转移配置：重试退避与提供者内置熔断
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverSettings {
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
    /// 连续失败多少次打开提供者熔断
    pub provider_failure_threshold: usize,
    pub provider_cooldown_seconds: u64,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            base_interval_ms: 1000,
            max_interval_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            provider_failure_threshold: 3,
            provider_cooldown_seconds: 300,
        }
    }
}

impl FailoverSettings {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_interval: Duration::from_millis(self.base_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            multiplier: self.backoff_multiplier,
            jitter_factor: self.jitter_factor,
        }
    }

    pub fn provider_circuit(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::consecutive_failures(
            self.provider_failure_threshold,
            Duration::from_secs(self.provider_cooldown_seconds),
        )
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_interval_ms < self.base_interval_ms {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础重试间隔"));
        }

        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1"));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动因子必须在0到1之间"));
        }

        if self.provider_failure_threshold == 0 {
            return Err(anyhow::anyhow!("提供者熔断阈值必须大于0"));
        }

        Ok(())
    }
}

/// 死信队列配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterSettings {
    /// JSONL 日志文件，未设置时只保存在内存中
    pub log_path: Option<String>,
    /// 每个条目允许的重放次数
    pub max_retries: u32,
}

impl Default for DeadLetterSettings {
    fn default() -> Self {
        Self {
            log_path: None,
            max_retries: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_windows_map_to_runtime_options() {
        let settings = CircuitBreakerSettings {
            trigger_threshold: 0,
            failure_window_seconds: 0,
            ..Default::default()
        };
        let runtime = settings.to_runtime();
        assert_eq!(runtime.trigger_threshold, None);
        assert_eq!(runtime.failure_window, None);
        assert_eq!(runtime.cooldown, Duration::from_secs(300));
    }

    #[test]
    fn test_failover_defaults_match_provider_circuit() {
        let settings = FailoverSettings::default();
        let circuit = settings.provider_circuit();
        assert_eq!(circuit.failure_threshold, 3);
        assert_eq!(circuit.failure_window, None);
        assert_eq!(circuit.cooldown, Duration::from_secs(300));
        assert_eq!(settings.backoff().delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn test_failover_validation() {
        let settings = FailoverSettings {
            jitter_factor: 1.5,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
