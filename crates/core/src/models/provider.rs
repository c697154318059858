use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitState;

/// 提供者配置，按 `priority` 升序尝试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_sec", alias = "timeoutSec")]
    pub timeout_sec: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_sec() -> f64 {
    30.0
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            max_retries: default_max_retries(),
            timeout_sec: default_timeout_sec(),
            enabled: true,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_sec(mut self, timeout_sec: f64) -> Self {
        self.timeout_sec = timeout_sec;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// 单次尝试的超时
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_sec).unwrap_or(Duration::from_secs(30))
    }

    /// 每个提供者至少尝试一次
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow::anyhow!("提供者名称不能为空"));
        }
        if self.timeout_sec.is_nan() || self.timeout_sec <= 0.0 {
            return Err(anyhow::anyhow!("提供者 {} 的超时时间必须大于0", self.name));
        }
        Ok(())
    }
}

/// 提供者运行时状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub failure_count: usize,
    pub circuit_state: CircuitState,
    pub open_until: Option<DateTime<Utc>>,
}
