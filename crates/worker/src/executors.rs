use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use resilient_core::{ExecutionRequest, TaskExecutor, TaskId, TaskRunResult};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

type RunningMap = Arc<Mutex<HashMap<TaskId, (u32, AbortHandle)>>>;

/// 进程内执行器
///
/// 每次派发在独立的 tokio 任务中运行，panic 被隔离为失败。开启
/// `interruptible` 后，`cancel` 会中止运行中的任务。
pub struct InProcessExecutor {
    name: String,
    interruptible: bool,
    /// 任务ID -> (派发序号, 中止句柄)
    running: RunningMap,
}

impl Default for InProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessExecutor {
    pub fn new() -> Self {
        Self {
            name: "in-process".to_string(),
            interruptible: false,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().map(|m| m.len()).unwrap_or_default()
    }
}

/// 派发结束（或执行 future 被丢弃）时移除登记
struct RunningGuard {
    running: RunningMap,
    task_id: TaskId,
    attempt: u32,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            if running
                .get(&self.task_id)
                .is_some_and(|(attempt, _)| *attempt == self.attempt)
            {
                running.remove(&self.task_id);
            }
        }
    }
}

#[async_trait]
impl TaskExecutor for InProcessExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: ExecutionRequest) -> TaskRunResult {
        let ExecutionRequest {
            task_id,
            attempt,
            run,
            cpu_affinity,
        } = request;

        if let Some(cores) = &cpu_affinity {
            debug!(task_id = %task_id, cores = ?cores, "进程内执行器不绑定CPU，亲和性仅作提示");
        }

        let handle = tokio::spawn(async move { run().await });
        let _guard = {
            let mut running = self
                .running
                .lock()
                .map_err(|_| anyhow!("执行器运行表锁已损坏"))?;
            running.insert(task_id.clone(), (attempt, handle.abort_handle()));
            RunningGuard {
                running: Arc::clone(&self.running),
                task_id: task_id.clone(),
                attempt,
            }
        };

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(anyhow!("任务 {task_id} 已被中断")),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "任务执行发生panic");
                Err(anyhow!("任务 {task_id} 执行异常终止: {e}"))
            }
        }
    }

    fn supports_interruption(&self) -> bool {
        self.interruptible
    }

    async fn cancel(&self, task_id: &str) -> bool {
        if !self.interruptible {
            return false;
        }
        let Ok(running) = self.running.lock() else {
            return false;
        };
        match running.get(task_id) {
            Some((_, handle)) => {
                handle.abort();
                info!(task_id = %task_id, "已中断运行中的任务");
                true
            }
            None => false,
        }
    }

    async fn is_running(&self, task_id: &str) -> bool {
        self.running
            .lock()
            .map(|m| m.contains_key(task_id))
            .unwrap_or(false)
    }
}
