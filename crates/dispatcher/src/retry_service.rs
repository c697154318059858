use std::time::Duration;

use tracing::debug;

use resilient_core::models::{Task, TaskState};

/// 一次派发的失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    /// 执行单元返回的应用错误
    Error(String),
    /// 超过单次派发的截止时间
    TimedOut(Duration),
}

impl TaskFailure {
    /// 重试用尽后对应的终态
    pub fn terminal_state(&self) -> TaskState {
        match self {
            TaskFailure::Error(_) => TaskState::Failed,
            TaskFailure::TimedOut(_) => TaskState::TimedOut,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TaskFailure::Error(message) => message.clone(),
            TaskFailure::TimedOut(timeout) => format!("执行超时 ({}ms)", timeout.as_millis()),
        }
    }
}

/// 重试决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 已原地回到就绪状态
    Retry { retry_count: u32 },
    /// 重试用尽，应以该状态终止
    GiveUp { state: TaskState },
}

/// 原地重试
///
/// 失败的任务在调度锁内直接修改重试计数并回到就绪状态，沿用同一个任务ID，
/// 不会经过外部提交路径。超时与应用错误共享同一个重试预算。
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskRetryService;

impl TaskRetryService {
    pub fn new() -> Self {
        Self
    }

    /// 处理一次失败的派发，必要时修改任务的重试计数与状态
    pub fn handle_failed_task(&self, task: &mut Task, failure: &TaskFailure) -> RetryDecision {
        if !task.can_retry() {
            debug!(
                "任务 {} 已达到最大重试次数 {}，不再重试",
                task.id, task.max_retries
            );
            return RetryDecision::GiveUp {
                state: failure.terminal_state(),
            };
        }

        task.retry_count += 1;
        task.state = TaskState::Ready;
        debug!(
            "任务 {} 原地重试 ({}/{}): {}",
            task.id,
            task.retry_count,
            task.max_retries,
            failure.describe()
        );
        RetryDecision::Retry {
            retry_count: task.retry_count,
        }
    }
}
