use std::{sync::Arc, time::Duration};

use resilient_core::{
    models::{SchedulerStats, TaskId, TaskOutput, TaskState},
    SchedulerError,
};
use resilient_infrastructure::{MetricsCollector, StructuredLogger};

/// 任务生命周期事件，经广播通道发送给订阅者
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Submitted {
        task_id: TaskId,
        state: TaskState,
        dependencies: usize,
    },
    Dispatched {
        task_id: TaskId,
        attempt: u32,
        policy: String,
    },
    Retrying {
        task_id: TaskId,
        retry_count: u32,
        max_retries: u32,
        reason: String,
    },
    Completed {
        task_id: TaskId,
        attempt: u32,
        output: TaskOutput,
        elapsed: Duration,
    },
    Failed {
        task_id: TaskId,
        retry_count: u32,
        message: String,
    },
    TimedOut {
        task_id: TaskId,
        retry_count: u32,
        timeout: Duration,
    },
    /// 依赖以失败终止，级联终止
    DependencyFailed {
        task_id: TaskId,
        dependency: TaskId,
    },
    Cancelled {
        task_id: TaskId,
        previous: TaskState,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            TaskEvent::Submitted { task_id, .. }
            | TaskEvent::Dispatched { task_id, .. }
            | TaskEvent::Retrying { task_id, .. }
            | TaskEvent::Completed { task_id, .. }
            | TaskEvent::Failed { task_id, .. }
            | TaskEvent::TimedOut { task_id, .. }
            | TaskEvent::DependencyFailed { task_id, .. }
            | TaskEvent::Cancelled { task_id, .. } => task_id,
        }
    }

    /// 任务离开引擎的事件，每个任务恰好一次
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::Completed { .. }
                | TaskEvent::Failed { .. }
                | TaskEvent::TimedOut { .. }
                | TaskEvent::DependencyFailed { .. }
                | TaskEvent::Cancelled { .. }
        )
    }

    /// 终态失败对应的错误
    pub fn error(&self) -> Option<SchedulerError> {
        match self {
            TaskEvent::Failed {
                task_id, message, ..
            } => Some(SchedulerError::TaskFailed {
                task_id: task_id.clone(),
                message: message.clone(),
            }),
            TaskEvent::TimedOut {
                task_id, timeout, ..
            } => Some(SchedulerError::TimedOut {
                task_id: task_id.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            TaskEvent::DependencyFailed {
                task_id,
                dependency,
            } => Some(SchedulerError::DependencyFailed {
                task_id: task_id.clone(),
                dependency: dependency.clone(),
            }),
            _ => None,
        }
    }
}

/// 任务事件监听器
///
/// 回调在调度锁之外串行调用，实现应保持轻量。
pub trait TaskEventListener: Send + Sync {
    fn on_complete(&self, _task_id: &str, _output: &TaskOutput) {}

    fn on_error(&self, _task_id: &str, _error: &SchedulerError) {}

    fn on_cancelled(&self, _task_id: &str) {}

    /// 每个事件都会调用，包括提交、派发与重试
    fn on_event(&self, _event: &TaskEvent) {}

    /// 每轮状态变更后的统计快照
    fn on_stats(&self, _stats: &SchedulerStats) {}
}

/// 将事件分发到监听器的对应回调
pub fn notify_listener(listener: &dyn TaskEventListener, event: &TaskEvent) {
    listener.on_event(event);
    match event {
        TaskEvent::Completed {
            task_id, output, ..
        } => listener.on_complete(task_id, output),
        TaskEvent::Cancelled { task_id, .. } => listener.on_cancelled(task_id),
        other => {
            if let Some(error) = other.error() {
                listener.on_error(other.task_id(), &error);
            }
        }
    }
}

/// 通过结构化日志输出任务事件
#[derive(Debug, Default)]
pub struct LoggingListener;

impl TaskEventListener for LoggingListener {
    fn on_event(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Submitted {
                task_id,
                state,
                dependencies,
            } => StructuredLogger::log_task_submitted(task_id, *state, *dependencies),
            TaskEvent::Dispatched {
                task_id,
                attempt,
                policy,
            } => StructuredLogger::log_task_dispatched(task_id, *attempt, policy),
            TaskEvent::Retrying {
                task_id,
                retry_count,
                max_retries,
                reason,
            } => StructuredLogger::log_task_retry(task_id, *retry_count, *max_retries, reason),
            TaskEvent::Completed {
                task_id,
                attempt,
                elapsed,
                ..
            } => StructuredLogger::log_task_completed(task_id, *attempt, *elapsed),
            TaskEvent::Failed {
                task_id,
                retry_count,
                message,
            } => StructuredLogger::log_task_failed(task_id, *retry_count, message),
            TaskEvent::TimedOut {
                task_id,
                retry_count,
                timeout,
            } => StructuredLogger::log_task_timed_out(task_id, *retry_count, *timeout),
            TaskEvent::DependencyFailed {
                task_id,
                dependency,
            } => StructuredLogger::log_task_failed(
                task_id,
                0,
                &format!("依赖任务 {dependency} 以失败终止"),
            ),
            TaskEvent::Cancelled { task_id, previous } => {
                StructuredLogger::log_task_cancelled(task_id, *previous)
            }
        }
    }
}

/// 将任务事件记录为指标，与熔断器和提供者管理器共用同一个收集器
#[derive(Default)]
pub struct MetricsListener {
    metrics: Arc<MetricsCollector>,
}

impl MetricsListener {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }
}

impl TaskEventListener for MetricsListener {
    fn on_event(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Submitted { .. } => self.metrics.record_task_submitted(),
            TaskEvent::Retrying { .. } => self.metrics.record_task_retry(),
            TaskEvent::Completed { elapsed, .. } => self.metrics.record_task_completed(*elapsed),
            TaskEvent::Failed { .. } | TaskEvent::DependencyFailed { .. } => {
                self.metrics.record_task_failed()
            }
            TaskEvent::TimedOut { .. } => self.metrics.record_task_timed_out(),
            TaskEvent::Cancelled { .. } => self.metrics.record_task_cancelled(),
            TaskEvent::Dispatched { .. } => {}
        }
    }

    fn on_stats(&self, stats: &SchedulerStats) {
        self.metrics.update_occupancy(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_listener_shares_collector() {
        let shared = Arc::new(MetricsCollector::new());
        let listener = MetricsListener::new(Arc::clone(&shared));
        assert!(Arc::ptr_eq(listener.collector(), &shared));

        listener.on_event(&TaskEvent::Cancelled {
            task_id: "t1".to_string(),
            previous: TaskState::Waiting,
        });
        listener.on_stats(&SchedulerStats::default());
        assert_eq!(Arc::strong_count(&shared), 2);
    }
}
