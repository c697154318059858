use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::traits::PolicyKind;

/// 调度引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 工作池大小
    pub max_concurrent: usize,
    pub policy: PolicyKind,
    /// 轮转策略下每个任务连续被选中的次数上限
    pub round_robin_time_slice: u32,
    pub default_timeout_seconds: u64,
    pub default_max_retries: u32,
    /// 依赖以失败终止时，级联终止仍在等待的下游任务
    pub propagate_dependency_failure: bool,
    /// 任务事件广播缓冲
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            policy: PolicyKind::Fifo,
            round_robin_time_slice: 1,
            default_timeout_seconds: 300,
            default_max_retries: 0,
            propagate_dependency_failure: false,
            event_buffer: 256,
        }
    }
}

impl SchedulerConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.default_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("默认任务超时时间必须大于0"));
        }

        if self.policy == PolicyKind::RoundRobin && self.round_robin_time_slice == 0 {
            return Err(anyhow::anyhow!("轮转调度的时间片必须大于0"));
        }

        if self.event_buffer == 0 {
            return Err(anyhow::anyhow!("事件缓冲大小必须大于0"));
        }

        Ok(())
    }
}
