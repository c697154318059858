use serde::{Deserialize, Serialize};

/// 调度器统计快照，在与状态变更相同的锁内生成
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    /// 原地重试次数
    pub retried: u64,
    pub running: usize,
    pub queued: usize,
    pub waiting: usize,
}

impl SchedulerStats {
    /// 已进入终态的任务数
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.timed_out + self.cancelled
    }

    pub fn is_idle(&self) -> bool {
        self.running == 0 && self.queued == 0
    }
}
