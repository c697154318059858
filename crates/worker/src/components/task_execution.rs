use std::sync::Arc;
use std::time::{Duration, Instant};

use resilient_core::{ExecutionRequest, TaskExecutor, TaskOutput};
use tracing::{debug, warn};

/// 一次派发的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Succeeded {
        output: TaskOutput,
        elapsed: Duration,
    },
    Failed {
        error: String,
        elapsed: Duration,
    },
    /// 超过截止时间；`interrupted` 表示执行单元是否确实被中断
    TimedOut {
        timeout: Duration,
        interrupted: bool,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded { .. })
    }
}

/// 包装执行器，为每次派发提供独立的截止时间计时器
pub struct TaskExecutionManager {
    executor: Arc<dyn TaskExecutor>,
}

impl TaskExecutionManager {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.executor
    }

    pub fn supports_interruption(&self) -> bool {
        self.executor.supports_interruption()
    }

    /// 执行到完成或超时。超时后尝试取消，无论是否真正停止都报告 `TimedOut`。
    pub async fn execute(&self, request: ExecutionRequest, timeout: Duration) -> ExecutionOutcome {
        let task_id = request.task_id.clone();
        let attempt = request.attempt;
        let started = Instant::now();

        debug!(
            "开始执行任务: task_id={}, attempt={}, executor={}",
            task_id,
            attempt,
            self.executor.name()
        );

        let execution = self.executor.execute(request);
        tokio::pin!(execution);

        match tokio::time::timeout(timeout, &mut execution).await {
            Ok(Ok(output)) => ExecutionOutcome::Succeeded {
                output,
                elapsed: started.elapsed(),
            },
            Ok(Err(e)) => ExecutionOutcome::Failed {
                error: format!("{e:#}"),
                elapsed: started.elapsed(),
            },
            Err(_) => {
                // 执行 future 仍存活，执行器可据此定位并中断任务
                let interrupted = self.executor.cancel(&task_id).await;
                warn!(
                    "任务执行超时: task_id={}, attempt={}, timeout={:?}, interrupted={}",
                    task_id, attempt, timeout, interrupted
                );
                ExecutionOutcome::TimedOut {
                    timeout,
                    interrupted,
                }
            }
        }
    }

    /// 尽力中断运行中的任务
    pub async fn cancel(&self, task_id: &str) -> bool {
        if !self.executor.supports_interruption() {
            return false;
        }
        self.executor.cancel(task_id).await
    }
}
