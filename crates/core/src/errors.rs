use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("无效的任务: {0}")]
    InvalidTask(String),

    #[error("检测到循环依赖: {task_id}")]
    CyclicDependency { task_id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("任务执行失败: {task_id} - {message}")]
    TaskFailed { task_id: String, message: String },

    #[error("任务执行超时: {task_id} ({timeout_ms}ms)")]
    TimedOut { task_id: String, timeout_ms: u64 },

    #[error("依赖任务失败: {task_id} 依赖 {dependency}")]
    DependencyFailed { task_id: String, dependency: String },

    #[error("熔断器已打开: {key}")]
    CircuitOpen { key: String },

    #[error("所有提供者均失败: {kind} (死信 {dead_letter_id}): {}", errors.join("; "))]
    AllProvidersFailed {
        kind: String,
        dead_letter_id: String,
        errors: Vec<String>,
    },

    #[error("死信重放次数已用尽: {id} ({retry_count}/{max_retries})")]
    RetriesExhausted {
        id: String,
        retry_count: u32,
        max_retries: u32,
    },

    #[error("死信条目未找到: {id}")]
    DeadLetterNotFound { id: String },

    #[error("调度器正在关闭")]
    ShuttingDown,

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("持久化错误: {0}")]
    Persistence(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        SchedulerError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl SchedulerError {
    /// 任务在执行阶段的终态失败（应用错误、超时、依赖失败）
    pub fn is_terminal_task_failure(&self) -> bool {
        matches!(
            self,
            SchedulerError::TaskFailed { .. }
                | SchedulerError::TimedOut { .. }
                | SchedulerError::DependencyFailed { .. }
        )
    }

    /// 调用方在尝试前即被拒绝，不计入任务失败
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SchedulerError::CircuitOpen { .. } | SchedulerError::ShuttingDown
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::TimedOut { .. } => true,
            SchedulerError::TaskFailed { message, .. } => crate::retry::is_retryable_error(message),
            _ => false,
        }
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
