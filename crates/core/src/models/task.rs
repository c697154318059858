use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

pub type TaskId = String;

/// 任务产出
pub type TaskOutput = serde_json::Value;

pub type TaskRunResult = anyhow::Result<TaskOutput>;

/// 零参数执行单元，重试时会被再次调用，因此是 `Fn` 而非 `FnOnce`
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, TaskRunResult> + Send + Sync>;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// 存在未完成的依赖
    Waiting,
    /// 依赖已满足，等待调度策略选中
    Ready,
    Running,
    Completed,
    /// 应用错误且重试已用尽
    Failed,
    /// 执行超时且重试已用尽
    TimedOut,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::TimedOut | TaskState::Cancelled
        )
    }

    /// 失败终态（dead）
    pub fn is_dead(&self) -> bool {
        matches!(self, TaskState::Failed | TaskState::TimedOut)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Waiting => "waiting",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::TimedOut => "timed_out",
            TaskState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// 提交记录
///
/// 未设置的 `id`、`timeout`、`max_retries` 在提交时由调度器补全。
#[derive(Clone, Default)]
pub struct TaskSpec {
    pub id: Option<TaskId>,
    pub run: Option<TaskFn>,
    pub priority: i32,
    pub depends_on: Vec<TaskId>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub estimated_duration: Option<Duration>,
    pub deadline: Option<DateTime<Utc>>,
    pub cpu_affinity: Option<BTreeSet<usize>>,
}

impl TaskSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskRunResult> + Send + 'static,
    {
        Self {
            run: Some(Arc::new(move || f().boxed())),
            ..Self::default()
        }
    }

    /// 同步闭包，放到阻塞线程池中执行
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn() -> TaskRunResult + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_fn(move || {
            let f = Arc::clone(&f);
            async move {
                tokio::task::spawn_blocking(move || f())
                    .await
                    .map_err(|e| anyhow::anyhow!("阻塞任务异常终止: {e}"))?
            }
        })
    }

    pub fn with_run(mut self, run: TaskFn) -> Self {
        self.run = Some(run);
        self
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_estimated_duration(mut self, estimated: Duration) -> Self {
        self.estimated_duration = Some(estimated);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cpu_affinity<I: IntoIterator<Item = usize>>(mut self, cores: I) -> Self {
        self.cpu_affinity = Some(cores.into_iter().collect());
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("run", &self.run.as_ref().map(|_| "<fn>"))
            .field("priority", &self.priority)
            .field("depends_on", &self.depends_on)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("estimated_duration", &self.estimated_duration)
            .field("deadline", &self.deadline)
            .field("cpu_affinity", &self.cpu_affinity)
            .finish()
    }
}

/// 已登记的任务
#[derive(Clone)]
pub struct Task {
    pub id: TaskId,
    pub run: TaskFn,
    pub priority: i32,
    pub depends_on: BTreeSet<TaskId>,
    pub timeout: Duration,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    /// 提交序号，用于同一时间戳下的稳定排序
    pub seq: u64,
    pub estimated_duration: Option<Duration>,
    pub deadline: Option<DateTime<Utc>>,
    pub cpu_affinity: Option<BTreeSet<usize>>,
    pub state: TaskState,
}

impl Task {
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("depends_on", &self.depends_on)
            .field("timeout", &self.timeout)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("created_at", &self.created_at)
            .field("seq", &self.seq)
            .field("estimated_duration", &self.estimated_duration)
            .field("deadline", &self.deadline)
            .field("cpu_affinity", &self.cpu_affinity)
            .field("state", &self.state)
            .finish()
    }
}
