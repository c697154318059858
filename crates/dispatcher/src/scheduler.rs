use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use resilient_core::{
    config::SchedulerConfig,
    models::{SchedulerStats, TaskId, TaskSpec, TaskState},
    traits::{ExecutionRequest, SchedulingPolicy, TaskExecutor},
    SchedulerError, SchedulerResult,
};
use resilient_worker::{ExecutionOutcome, TaskExecutionManager};

use crate::retry_service::TaskFailure;
use crate::state_listener::{notify_listener, TaskEvent, TaskEventListener};
use crate::strategies::create_policy;
use crate::task_graph::{Dispatch, TaskDefaults, TaskGraph};

/// 工作单元执行结束后发回协调循环的通知
struct Completion {
    task_id: TaskId,
    dispatch: u64,
    outcome: ExecutionOutcome,
}

/// 调度锁保护的全部可变状态
struct EngineState {
    graph: TaskGraph,
    policy: Box<dyn SchedulingPolicy>,
    /// 每次状态变更递增，用于丢弃乱序到达的统计快照
    revision: u64,
}

type StatsSnapshot = (u64, SchedulerStats);

struct SchedulerInner {
    config: SchedulerConfig,
    defaults: TaskDefaults,
    state: Mutex<EngineState>,
    execution: Arc<TaskExecutionManager>,
    completions: mpsc::UnboundedSender<Completion>,
    events: broadcast::Sender<TaskEvent>,
    stats: watch::Sender<StatsSnapshot>,
    stop: watch::Sender<bool>,
    accepting: AtomicBool,
    listeners: RwLock<Vec<Arc<dyn TaskEventListener>>>,
    /// 串行化监听器回调
    notify_lock: Mutex<()>,
}

/// 任务调度器
///
/// 组合任务图、调度策略与有界工作池。所有任务状态只在调度锁内修改，
/// 锁从不跨越任务执行或监听器回调。工作单元不直接修改状态，而是通过
/// 通道把结果交给唯一的协调循环处理。
///
/// 必须在 tokio 运行时内创建。
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        policy: Box<dyn SchedulingPolicy>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let (completions, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (stats, _) = watch::channel((0, SchedulerStats::default()));
        let (stop, stop_receiver) = watch::channel(false);
        let defaults = TaskDefaults {
            timeout: config.default_timeout(),
            max_retries: config.default_max_retries,
        };

        info!(
            "调度器启动: policy={}, max_concurrent={}, executor={}",
            policy.name(),
            config.max_concurrent,
            executor.name()
        );

        let inner = Arc::new(SchedulerInner {
            state: Mutex::new(EngineState {
                graph: TaskGraph::new(config.propagate_dependency_failure),
                policy,
                revision: 0,
            }),
            config,
            defaults,
            execution: Arc::new(TaskExecutionManager::new(executor)),
            completions,
            events,
            stats,
            stop,
            accepting: AtomicBool::new(true),
            listeners: RwLock::new(Vec::new()),
            notify_lock: Mutex::new(()),
        });

        tokio::spawn(run_coordinator(
            Arc::downgrade(&inner),
            receiver,
            stop_receiver,
        ));

        Self { inner }
    }

    /// 按配置中的策略类型创建
    pub fn from_config(config: SchedulerConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        let policy = create_policy(config.policy, config.round_robin_time_slice);
        Self::new(config, policy, executor)
    }

    pub fn with_listener(self, listener: Arc<dyn TaskEventListener>) -> Self {
        match self.inner.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(_) => warn!("监听器列表锁已损坏，忽略新监听器"),
        }
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// 提交任务，返回任务ID
    pub async fn submit(&self, spec: TaskSpec) -> SchedulerResult<TaskId> {
        if !self.is_accepting() {
            return Err(SchedulerError::ShuttingDown);
        }

        let (submission, dispatches, snapshot) = {
            let mut state = self.inner.state.lock().await;
            if !self.is_accepting() {
                return Err(SchedulerError::ShuttingDown);
            }
            let mut submission = match state.graph.insert(spec, &self.inner.defaults) {
                Ok(submission) => submission,
                Err(e) => {
                    warn!("任务提交被拒绝: {}", e);
                    return Err(e);
                }
            };
            let dispatches = self.inner.fill_slots(&mut state, &mut submission.events);
            let snapshot = SchedulerInner::snapshot(&mut state);
            (submission, dispatches, snapshot)
        };

        self.inner.spawn_workers(dispatches);
        self.inner.publish(submission.events, snapshot).await;
        Ok(submission.task_id)
    }

    /// 取消任务
    ///
    /// 等待中或就绪的任务立即移除并返回 `true`。运行中的任务只有在执行器
    /// 支持中断且中断成功时才返回 `true`，否则返回 `false`，任务稍后照常
    /// 报告完成或失败。已终止的任务返回 `false`。
    pub async fn cancel(&self, task_id: &str) -> SchedulerResult<bool> {
        let (events, dispatches, snapshot) = {
            let mut state = self.inner.state.lock().await;
            match state.graph.state_of(task_id) {
                None => {
                    return Err(SchedulerError::TaskNotFound {
                        id: task_id.to_string(),
                    })
                }
                Some(current) if current.is_terminal() => return Ok(false),
                Some(TaskState::Running) => {
                    let dispatch = state.graph.dispatch_of(task_id);
                    // 中断执行单元时不持有调度锁
                    drop(state);
                    if !self.inner.execution.cancel(task_id).await {
                        debug!("任务 {} 正在运行且无法中断，取消请求被忽略", task_id);
                        return Ok(false);
                    }
                    state = self.inner.state.lock().await;
                    if state.graph.dispatch_of(task_id) != dispatch {
                        debug!("任务 {} 在中断期间已结束本次派发", task_id);
                        return Ok(false);
                    }
                }
                Some(_) => {}
            }

            let mut events = state.graph.cancel(task_id)?;
            let dispatches = self.inner.fill_slots(&mut state, &mut events);
            let snapshot = SchedulerInner::snapshot(&mut state);
            (events, dispatches, snapshot)
        };

        self.inner.spawn_workers(dispatches);
        self.inner.publish(events, snapshot).await;
        Ok(true)
    }

    /// 在调度锁内生成的统计快照
    pub async fn get_stats(&self) -> SchedulerStats {
        self.inner.state.lock().await.graph.stats()
    }

    pub async fn task_state(&self, task_id: &str) -> Option<TaskState> {
        self.inner.state.lock().await.graph.state_of(task_id)
    }

    /// 订阅任务事件；消费过慢的订阅者会丢失最旧的事件
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// 停止接收新任务；`wait` 为真时等待运行中与就绪的任务全部结束
    ///
    /// 仍在等待依赖的任务此时已无法就绪，只记录告警。
    pub async fn shutdown(&self, wait: bool) -> SchedulerResult<SchedulerStats> {
        // 在调度锁内停止接收，之后的快照必然反映所有已接受的提交
        let target = {
            let state = self.inner.state.lock().await;
            if self.inner.accepting.swap(false, Ordering::SeqCst) {
                info!("调度器停止接收新任务");
            }
            state.revision
        };

        if wait {
            let mut receiver = self.inner.stats.subscribe();
            receiver
                .wait_for(|(revision, stats)| *revision >= target && stats.is_idle())
                .await
                .map_err(|_| SchedulerError::Internal("统计通道已关闭".to_string()))?;
        }

        let (stats, stalled) = {
            let state = self.inner.state.lock().await;
            (state.graph.stats(), state.graph.waiting_ids())
        };
        if !stalled.is_empty() {
            warn!(
                "调度器关闭时仍有 {} 个任务在等待依赖: {:?}",
                stalled.len(),
                stalled
            );
        }

        self.inner.stop.send_replace(true);
        info!(
            "调度器已关闭: completed={}, failed={}, timed_out={}, cancelled={}",
            stats.completed, stats.failed, stats.timed_out, stats.cancelled
        );
        Ok(stats)
    }
}

impl SchedulerInner {
    async fn handle_completion(&self, completion: Completion) {
        let Completion {
            task_id,
            dispatch,
            outcome,
        } = completion;

        let (events, dispatches, snapshot) = {
            let mut state = self.state.lock().await;
            let mut events = match outcome {
                ExecutionOutcome::Succeeded { output, elapsed } => {
                    state.graph.complete(&task_id, dispatch, output, elapsed)
                }
                ExecutionOutcome::Failed { error, .. } => {
                    state
                        .graph
                        .fail(&task_id, dispatch, TaskFailure::Error(error))
                }
                ExecutionOutcome::TimedOut {
                    timeout,
                    interrupted,
                } => {
                    if !interrupted {
                        warn!("任务 {} 超时，执行单元未能中断，将在后台继续运行", task_id);
                    }
                    state
                        .graph
                        .fail(&task_id, dispatch, TaskFailure::TimedOut(timeout))
                }
            };
            let dispatches = self.fill_slots(&mut state, &mut events);
            (events, dispatches, Self::snapshot(&mut state))
        };

        self.spawn_workers(dispatches);
        self.publish(events, snapshot).await;
    }

    /// 通知策略清理已终止任务，然后按策略填满空闲的工作槽位
    fn fill_slots(&self, state: &mut EngineState, events: &mut Vec<TaskEvent>) -> Vec<Dispatch> {
        let EngineState { graph, policy, .. } = state;
        for event in events.iter().filter(|e| e.is_terminal()) {
            policy.forget(event.task_id());
        }

        let capacity = self.config.max_concurrent.max(1);
        let mut dispatches = Vec::new();
        while graph.running_count() < capacity {
            let Some(dispatch) = graph.next_dispatch(policy.as_mut()) else {
                break;
            };
            events.push(TaskEvent::Dispatched {
                task_id: dispatch.task_id.clone(),
                attempt: dispatch.attempt,
                policy: policy.name().to_string(),
            });
            dispatches.push(dispatch);
        }
        dispatches
    }

    fn snapshot(state: &mut EngineState) -> StatsSnapshot {
        state.revision += 1;
        (state.revision, state.graph.stats())
    }

    fn spawn_workers(&self, dispatches: Vec<Dispatch>) {
        for dispatch in dispatches {
            let execution = Arc::clone(&self.execution);
            let completions = self.completions.clone();
            tokio::spawn(async move {
                let Dispatch {
                    task_id,
                    number,
                    attempt,
                    run,
                    timeout,
                    cpu_affinity,
                } = dispatch;
                let request = ExecutionRequest {
                    task_id: task_id.clone(),
                    attempt,
                    run,
                    cpu_affinity,
                };
                let outcome = execution.execute(request, timeout).await;
                let completion = Completion {
                    task_id,
                    dispatch: number,
                    outcome,
                };
                if completions.send(completion).is_err() {
                    debug!("调度协调循环已退出，丢弃完成通知");
                }
            });
        }
    }

    /// 在锁外依次通知监听器与订阅者，最后发布统计快照
    async fn publish(&self, events: Vec<TaskEvent>, snapshot: StatsSnapshot) {
        let _serial = self.notify_lock.lock().await;
        let listeners: Vec<Arc<dyn TaskEventListener>> = self
            .listeners
            .read()
            .map(|listeners| listeners.clone())
            .unwrap_or_default();

        for event in events {
            for listener in &listeners {
                notify_listener(listener.as_ref(), &event);
            }
            // 没有订阅者时发送失败，属正常情况
            let _ = self.events.send(event);
        }
        for listener in &listeners {
            listener.on_stats(&snapshot.1);
        }

        self.stats.send_if_modified(|current| {
            if snapshot.0 > current.0 {
                *current = snapshot;
                true
            } else {
                false
            }
        });
    }

    /// 已停止接收且任务图中没有运行或就绪的任务
    async fn is_drained(&self) -> bool {
        if self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        self.state.lock().await.graph.stats().is_idle()
    }
}

/// 唯一的协调循环：逐个处理完成通知
async fn run_coordinator(
    inner: Weak<SchedulerInner>,
    mut completions: mpsc::UnboundedReceiver<Completion>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = completions.recv() => {
                let Some(completion) = received else { break };
                let Some(inner) = inner.upgrade() else { break };
                inner.handle_completion(completion).await;
                if inner.is_drained().await {
                    break;
                }
            }
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(inner) = inner.upgrade() else { break };
                if inner.is_drained().await {
                    break;
                }
            }
        }
    }
    debug!("调度协调循环退出");
}
