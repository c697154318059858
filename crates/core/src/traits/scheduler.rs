use crate::models::Task;

/// 调度策略
///
/// 给定就绪任务（按进入就绪队列的顺序），选出下一个要运行的任务下标。
/// 相同的就绪集合必须得到相同的选择。
pub trait SchedulingPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn select(&mut self, ready: &[&Task]) -> Option<usize>;

    /// 任务离开引擎（终态）时调用，用于清理策略内部的簿记
    fn forget(&mut self, _task_id: &str) {}
}

/// 内置调度策略类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Fifo,
    #[serde(alias = "shortest_job_first")]
    Sjf,
    RoundRobin,
    #[serde(alias = "earliest_deadline_first")]
    Edf,
    Priority,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Fifo => "fifo",
            PolicyKind::Sjf => "sjf",
            PolicyKind::RoundRobin => "round_robin",
            PolicyKind::Edf => "edf",
            PolicyKind::Priority => "priority",
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = crate::SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fifo" => Ok(PolicyKind::Fifo),
            "sjf" | "shortest_job_first" => Ok(PolicyKind::Sjf),
            "round_robin" | "rr" => Ok(PolicyKind::RoundRobin),
            "edf" | "earliest_deadline_first" => Ok(PolicyKind::Edf),
            "priority" => Ok(PolicyKind::Priority),
            other => Err(crate::SchedulerError::Configuration(format!(
                "不支持的调度策略: {other}"
            ))),
        }
    }
}
