use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use resilient_core::{
    models::{SchedulerStats, Task, TaskFn, TaskId, TaskOutput, TaskSpec, TaskState},
    traits::SchedulingPolicy,
    SchedulerError, SchedulerResult,
};

use crate::dependency_checker::DependencyChecker;
use crate::retry_service::{RetryDecision, TaskFailure, TaskRetryService};
use crate::state_listener::TaskEvent;

/// 提交时补全的默认值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDefaults {
    pub timeout: Duration,
    pub max_retries: u32,
}

/// 一次派发，交给工作池执行
#[derive(Clone)]
pub struct Dispatch {
    pub task_id: TaskId,
    /// 派发序号，完成通知必须携带同一序号才会被接受
    pub number: u64,
    pub attempt: u32,
    pub run: TaskFn,
    pub timeout: Duration,
    pub cpu_affinity: Option<BTreeSet<usize>>,
}

/// 提交结果
#[derive(Debug, Clone)]
pub struct Submission {
    pub task_id: TaskId,
    pub state: TaskState,
    pub events: Vec<TaskEvent>,
}

/// 任务图
///
/// 持有任务注册表、反向依赖表以及就绪、等待、运行、完成四个集合。
/// 所有方法都要求调用方持有调度锁。
///
/// 终态记录在调度器生命周期内保留：晚到的依赖者、重复ID检查和状态查询都依赖它们。
/// 任务离开引擎时其可执行单元即被释放，每条记录只剩ID与终态。
pub struct TaskGraph {
    tasks: HashMap<TaskId, Task>,
    dependents: HashMap<TaskId, BTreeSet<TaskId>>,
    /// 按进入就绪队列的顺序
    ready: Vec<TaskId>,
    /// 按提交顺序
    waiting: Vec<TaskId>,
    /// 任务ID -> 派发序号
    running: HashMap<TaskId, u64>,
    /// 成功完成的任务ID，不做淘汰
    completed: HashSet<TaskId>,
    /// 已离开引擎的任务及其终态，不做淘汰
    retired: HashMap<TaskId, TaskState>,
    checker: DependencyChecker,
    retry_service: TaskRetryService,
    propagate_dependency_failure: bool,
    next_seq: u64,
    next_dispatch: u64,
    stats: SchedulerStats,
}

impl TaskGraph {
    pub fn new(propagate_dependency_failure: bool) -> Self {
        Self {
            tasks: HashMap::new(),
            dependents: HashMap::new(),
            ready: Vec::new(),
            waiting: Vec::new(),
            running: HashMap::new(),
            completed: HashSet::new(),
            retired: HashMap::new(),
            checker: DependencyChecker::new(),
            retry_service: TaskRetryService::new(),
            propagate_dependency_failure,
            next_seq: 0,
            next_dispatch: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// 校验并登记任务；依赖未满足的进入等待集合，否则进入就绪队列
    pub fn insert(&mut self, spec: TaskSpec, defaults: &TaskDefaults) -> SchedulerResult<Submission> {
        let TaskSpec {
            id,
            run,
            priority,
            depends_on,
            timeout,
            max_retries,
            estimated_duration,
            deadline,
            cpu_affinity,
        } = spec;

        let task_id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if task_id.is_empty() {
            return Err(SchedulerError::InvalidTask("任务ID不能为空".to_string()));
        }
        let run = run.ok_or_else(|| {
            SchedulerError::InvalidTask(format!("任务 {task_id} 缺少可执行单元"))
        })?;
        if self.tasks.contains_key(&task_id) || self.retired.contains_key(&task_id) {
            return Err(SchedulerError::InvalidTask(format!(
                "任务ID {task_id} 已存在"
            )));
        }
        let timeout = timeout.unwrap_or(defaults.timeout);
        if timeout.is_zero() {
            return Err(SchedulerError::InvalidTask(format!(
                "任务 {task_id} 的超时时间必须大于0"
            )));
        }

        let depends_on: BTreeSet<TaskId> = depends_on.into_iter().collect();
        self.checker
            .validate_dependencies(&task_id, &depends_on, &self.tasks, &self.retired)?;

        let task = Task {
            id: task_id.clone(),
            run,
            priority,
            depends_on,
            timeout,
            retry_count: 0,
            max_retries: max_retries.unwrap_or(defaults.max_retries),
            created_at: Utc::now(),
            seq: self.next_seq,
            estimated_duration,
            deadline,
            cpu_affinity,
            state: TaskState::Waiting,
        };
        self.next_seq += 1;
        self.stats.submitted += 1;

        for dep in &task.depends_on {
            if self.tasks.contains_key(dep) {
                self.dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(task_id.clone());
            }
        }

        let dependencies = task.depends_on.len();
        let failed_dependency = if self.propagate_dependency_failure {
            task.depends_on
                .iter()
                .find(|dep| {
                    self.retired
                        .get(*dep)
                        .is_some_and(|state| *state != TaskState::Completed)
                })
                .cloned()
        } else {
            None
        };
        let ready = self.checker.is_ready(&task.depends_on, &self.completed);
        self.tasks.insert(task_id.clone(), task);

        let mut events = Vec::new();
        let state = if let Some(dependency) = failed_dependency {
            events.push(TaskEvent::Submitted {
                task_id: task_id.clone(),
                state: TaskState::Waiting,
                dependencies,
            });
            self.waiting.push(task_id.clone());
            self.finalize_dependency_failure(&task_id, &dependency, &mut events);
            TaskState::Failed
        } else if ready {
            self.set_state(&task_id, TaskState::Ready);
            self.ready.push(task_id.clone());
            events.push(TaskEvent::Submitted {
                task_id: task_id.clone(),
                state: TaskState::Ready,
                dependencies,
            });
            TaskState::Ready
        } else {
            self.waiting.push(task_id.clone());
            events.push(TaskEvent::Submitted {
                task_id: task_id.clone(),
                state: TaskState::Waiting,
                dependencies,
            });
            TaskState::Waiting
        };

        Ok(Submission {
            task_id,
            state,
            events,
        })
    }

    /// 由调度策略从就绪队列中选出下一个任务并移入运行集合
    pub fn next_dispatch(&mut self, policy: &mut dyn SchedulingPolicy) -> Option<Dispatch> {
        let (ids, candidates): (Vec<&TaskId>, Vec<&Task>) = self
            .ready
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|task| (id, task)))
            .unzip();
        let index = policy.select(&candidates)?;
        let task_id = ids.get(index).map(|id| (*id).clone())?;

        self.ready.retain(|id| *id != task_id);
        self.next_dispatch += 1;
        let number = self.next_dispatch;
        self.running.insert(task_id.clone(), number);

        let task = self.tasks.get_mut(&task_id)?;
        task.state = TaskState::Running;
        Some(Dispatch {
            task_id,
            number,
            attempt: task.retry_count,
            run: task.run.clone(),
            timeout: task.timeout,
            cpu_affinity: task.cpu_affinity.clone(),
        })
    }

    /// 派发成功完成；过期的完成通知返回空事件
    pub fn complete(
        &mut self,
        task_id: &str,
        dispatch: u64,
        output: TaskOutput,
        elapsed: Duration,
    ) -> Vec<TaskEvent> {
        if !self.is_current_dispatch(task_id, dispatch) {
            debug!("忽略过期的完成通知: task_id={}, dispatch={}", task_id, dispatch);
            return Vec::new();
        }
        let attempt = self.tasks.get(task_id).map(|t| t.retry_count).unwrap_or(0);
        self.completed.insert(task_id.to_string());
        self.stats.completed += 1;
        self.retire(task_id, TaskState::Completed);
        self.rescan();
        vec![TaskEvent::Completed {
            task_id: task_id.to_string(),
            attempt,
            output,
            elapsed,
        }]
    }

    /// 派发失败：原地重试或以失败/超时终止
    pub fn fail(&mut self, task_id: &str, dispatch: u64, failure: TaskFailure) -> Vec<TaskEvent> {
        if !self.is_current_dispatch(task_id, dispatch) {
            debug!("忽略过期的失败通知: task_id={}, dispatch={}", task_id, dispatch);
            return Vec::new();
        }
        self.running.remove(task_id);

        let Some(task) = self.tasks.get_mut(task_id) else {
            return Vec::new();
        };
        let retry_count = task.retry_count;
        let max_retries = task.max_retries;
        let mut events = Vec::new();

        match self.retry_service.handle_failed_task(task, &failure) {
            RetryDecision::Retry { retry_count } => {
                self.stats.retried += 1;
                self.ready.push(task_id.to_string());
                events.push(TaskEvent::Retrying {
                    task_id: task_id.to_string(),
                    retry_count,
                    max_retries,
                    reason: failure.describe(),
                });
            }
            RetryDecision::GiveUp { state } => {
                events.push(match failure {
                    TaskFailure::Error(message) => TaskEvent::Failed {
                        task_id: task_id.to_string(),
                        retry_count,
                        message,
                    },
                    TaskFailure::TimedOut(timeout) => TaskEvent::TimedOut {
                        task_id: task_id.to_string(),
                        retry_count,
                        timeout,
                    },
                });
                match state {
                    TaskState::TimedOut => self.stats.timed_out += 1,
                    _ => self.stats.failed += 1,
                }
                self.retire(task_id, state);
                self.rescan();
                self.propagate_failure(task_id, &mut events);
            }
        }
        events
    }

    /// 取消任务。未知ID返回 `TaskNotFound`，已终止的任务返回空事件。
    ///
    /// 运行中的任务只有在调用方已确认执行单元被中断后才应取消。
    pub fn cancel(&mut self, task_id: &str) -> SchedulerResult<Vec<TaskEvent>> {
        let Some(previous) = self.state_of(task_id) else {
            return Err(SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            });
        };
        if previous.is_terminal() {
            return Ok(Vec::new());
        }

        let mut events = vec![TaskEvent::Cancelled {
            task_id: task_id.to_string(),
            previous,
        }];
        self.stats.cancelled += 1;
        self.retire(task_id, TaskState::Cancelled);
        self.rescan();
        self.propagate_failure(task_id, &mut events);
        Ok(events)
    }

    /// 重新扫描等待集合，将依赖已全部完成的任务移入就绪队列
    pub fn rescan(&mut self) -> usize {
        let completed = &self.completed;
        let checker = &self.checker;
        let tasks = &mut self.tasks;
        let mut promoted = Vec::new();

        self.waiting.retain(|id| match tasks.get_mut(id) {
            Some(task) if checker.is_ready(&task.depends_on, completed) => {
                task.state = TaskState::Ready;
                promoted.push(id.clone());
                false
            }
            Some(_) => true,
            None => false,
        });

        if !promoted.is_empty() {
            debug!("依赖已满足，{} 个任务进入就绪队列: {:?}", promoted.len(), promoted);
        }
        let count = promoted.len();
        self.ready.extend(promoted);
        count
    }

    /// 依赖失败级联：开启时终止所有仍在等待的下游任务
    pub fn propagate_failure(&mut self, task_id: &str, events: &mut Vec<TaskEvent>) {
        if !self.propagate_dependency_failure {
            return;
        }
        let downstream = self.checker.transitive_dependents(task_id, &self.dependents);
        for dependent in downstream {
            if self.tasks.get(&dependent).map(|t| t.state) == Some(TaskState::Waiting) {
                self.finalize_dependency_failure(&dependent, task_id, events);
            }
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            running: self.running.len(),
            queued: self.ready.len(),
            waiting: self.waiting.len(),
            ..self.stats
        }
    }

    /// 当前状态；已离开引擎的任务返回其终态
    pub fn state_of(&self, task_id: &str) -> Option<TaskState> {
        self.tasks
            .get(task_id)
            .map(|t| t.state)
            .or_else(|| self.retired.get(task_id).copied())
    }

    /// 运行中任务的当前派发序号
    pub fn dispatch_of(&self, task_id: &str) -> Option<u64> {
        self.running.get(task_id).copied()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// 等待集合中的任务，按提交顺序
    pub fn waiting_ids(&self) -> Vec<TaskId> {
        self.waiting.clone()
    }

    fn is_current_dispatch(&self, task_id: &str, dispatch: u64) -> bool {
        self.running.get(task_id) == Some(&dispatch)
    }

    fn set_state(&mut self, task_id: &str, state: TaskState) {
        if let Some(task) = self.tasks.get_mut(task_id) {
            task.state = state;
        }
    }

    fn finalize_dependency_failure(
        &mut self,
        task_id: &str,
        dependency: &str,
        events: &mut Vec<TaskEvent>,
    ) {
        warn!("任务 {} 的依赖 {} 以失败终止，级联终止", task_id, dependency);
        events.push(TaskEvent::DependencyFailed {
            task_id: task_id.to_string(),
            dependency: dependency.to_string(),
        });
        self.stats.failed += 1;
        self.retire(task_id, TaskState::Failed);
    }

    /// 从所有集合中移除任务，只保留终态记录
    fn retire(&mut self, task_id: &str, state: TaskState) {
        self.ready.retain(|id| id != task_id);
        self.waiting.retain(|id| id != task_id);
        self.running.remove(task_id);
        if let Some(task) = self.tasks.remove(task_id) {
            for dep in &task.depends_on {
                if let Some(set) = self.dependents.get_mut(dep) {
                    set.remove(task_id);
                    if set.is_empty() {
                        self.dependents.remove(dep);
                    }
                }
            }
        }
        self.retired.insert(task_id.to_string(), state);
    }
}
