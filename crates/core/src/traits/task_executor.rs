//! 任务执行器接口定义
//!
//! 调度引擎只依赖 [`TaskExecutor`]：进程内协程池、隔离沙箱等执行环境
//! 都以新的执行器实现接入，而不是新的调度器。
//!
//! ## 取消语义
//!
//! 运行中任务的取消是尽力而为的。只有 `supports_interruption()` 为真的执行器
//! 才可能在任务完成前中断它；其余执行器的 `cancel` 返回 `false`，任务之后仍会
//! 正常报告完成或失败。

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::models::{TaskFn, TaskId, TaskRunResult};

/// 一次派发的执行请求
#[derive(Clone)]
pub struct ExecutionRequest {
    pub task_id: TaskId,
    /// 第几次派发，从0开始
    pub attempt: u32,
    pub run: TaskFn,
    pub cpu_affinity: Option<BTreeSet<usize>>,
}

impl std::fmt::Debug for ExecutionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("task_id", &self.task_id)
            .field("attempt", &self.attempt)
            .field("cpu_affinity", &self.cpu_affinity)
            .finish()
    }
}

/// 任务执行器
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// 执行任务直到完成，工作单元的 panic 以错误返回
    async fn execute(&self, request: ExecutionRequest) -> TaskRunResult;

    /// 是否能在完成前中断运行中的任务
    fn supports_interruption(&self) -> bool {
        false
    }

    /// 尝试中断运行中的任务，成功中断返回 `true`
    ///
    /// 调度器调用时不持有调度锁，实现可以等待I/O（例如通知隔离进程）。
    async fn cancel(&self, task_id: &str) -> bool;

    async fn is_running(&self, task_id: &str) -> bool;
}
