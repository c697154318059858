#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use resilient_core::config::SchedulerConfig;
    use resilient_core::*;
    use serde_json::json;
    use tokio::sync::broadcast;

    use async_trait::async_trait;
    use resilient_dispatcher::{Scheduler, TaskEvent, TaskEventListener};
    use resilient_worker::InProcessExecutor;

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Default)]
    struct Recorder {
        completed: Mutex<Vec<String>>,
        errors: Mutex<Vec<(String, String)>>,
        cancelled: Mutex<Vec<String>>,
    }

    impl TaskEventListener for Recorder {
        fn on_complete(&self, task_id: &str, _output: &TaskOutput) {
            self.completed.lock().unwrap().push(task_id.to_string());
        }

        fn on_error(&self, task_id: &str, error: &SchedulerError) {
            let kind = match error {
                SchedulerError::TimedOut { .. } => "timed_out",
                SchedulerError::DependencyFailed { .. } => "dependency_failed",
                _ => "failed",
            };
            self.errors
                .lock()
                .unwrap()
                .push((task_id.to_string(), kind.to_string()));
        }

        fn on_cancelled(&self, task_id: &str) {
            self.cancelled.lock().unwrap().push(task_id.to_string());
        }
    }

    fn config(max_concurrent: usize, policy: PolicyKind) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent,
            policy,
            ..SchedulerConfig::default()
        }
    }

    fn scheduler(max_concurrent: usize) -> Scheduler {
        Scheduler::from_config(
            config(max_concurrent, PolicyKind::Fifo),
            Arc::new(InProcessExecutor::new()),
        )
    }

    /// 记录开始与结束时间点的任务
    fn recording(log: &Log, name: &str, ms: u64) -> TaskSpec {
        let log = Arc::clone(log);
        let id = name.to_string();
        let name = name.to_string();
        TaskSpec::from_fn(move || {
            let log = Arc::clone(&log);
            let name = name.clone();
            async move {
                log.lock().unwrap().push(format!("start:{name}"));
                tokio::time::sleep(Duration::from_millis(ms)).await;
                log.lock().unwrap().push(format!("end:{name}"));
                Ok::<_, anyhow::Error>(json!(name))
            }
        })
        .with_id(id)
    }

    fn sleeper(ms: u64) -> TaskSpec {
        TaskSpec::from_fn(move || async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, anyhow::Error>(json!(ms))
        })
    }

    fn failing() -> TaskSpec {
        TaskSpec::from_fn(|| async { Err::<TaskOutput, _>(anyhow::anyhow!("boom")) })
    }

    fn position(log: &[String], entry: &str) -> usize {
        log.iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} missing from {log:?}"))
    }

    async fn wait_terminal(events: &mut broadcast::Receiver<TaskEvent>, task_id: &str) -> TaskEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(event) if event.is_terminal() && event.task_id() == task_id => return event,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream closed: {e}"),
                }
            }
        })
        .await
        .expect("terminal event should arrive")
    }

    #[tokio::test]
    async fn test_dependent_runs_after_all_dependencies_complete() {
        let scheduler = scheduler(4);
        let log: Log = Arc::default();

        scheduler.submit(recording(&log, "a", 30)).await.unwrap();
        scheduler.submit(recording(&log, "b", 60)).await.unwrap();
        scheduler
            .submit(recording(&log, "c", 1).depends_on(["a", "b"]))
            .await
            .unwrap();
        assert_eq!(scheduler.task_state("c").await, Some(TaskState::Waiting));

        let stats = scheduler.shutdown(true).await.unwrap();
        assert_eq!(stats.completed, 3);

        let log = log.lock().unwrap().clone();
        let start_c = position(&log, "start:c");
        assert!(start_c > position(&log, "end:a"));
        assert!(start_c > position(&log, "end:b"));
    }

    #[tokio::test]
    async fn test_task_with_failed_dependency_waits_indefinitely() {
        let scheduler = scheduler(2);
        let mut events = scheduler.subscribe();

        scheduler.submit(failing().with_id("a")).await.unwrap();
        scheduler
            .submit(sleeper(1).with_id("b").depends_on(["a"]))
            .await
            .unwrap();

        assert!(matches!(
            wait_terminal(&mut events, "a").await,
            TaskEvent::Failed { .. }
        ));
        let stats = scheduler.shutdown(true).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.waiting, 1);
        assert_eq!(scheduler.task_state("b").await, Some(TaskState::Waiting));
    }

    #[tokio::test]
    async fn test_dependency_failure_propagation_when_enabled() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = Scheduler::from_config(
            SchedulerConfig {
                propagate_dependency_failure: true,
                ..config(2, PolicyKind::Fifo)
            },
            Arc::new(InProcessExecutor::new()),
        )
        .with_listener(recorder.clone());

        scheduler.submit(failing().with_id("a")).await.unwrap();
        scheduler
            .submit(sleeper(1).with_id("b").depends_on(["a"]))
            .await
            .unwrap();
        scheduler
            .submit(sleeper(1).with_id("c").depends_on(["b"]))
            .await
            .unwrap();

        let stats = scheduler.shutdown(true).await.unwrap();
        // a 可能在 b 提交前就已失败，此时 b 在提交时直接终止
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.waiting, 0);
        let errors = recorder.errors.lock().unwrap().clone();
        assert!(errors.contains(&("b".to_string(), "dependency_failed".to_string())));
        assert!(errors.contains(&("c".to_string(), "dependency_failed".to_string())));
    }

    #[tokio::test]
    async fn test_cancel_queued_task_never_executes() {
        let scheduler = scheduler(1);
        let executed = Arc::new(AtomicU32::new(0));

        scheduler.submit(sleeper(100).with_id("blocker")).await.unwrap();
        let counter = Arc::clone(&executed);
        scheduler
            .submit(
                TaskSpec::from_fn(move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(json!(null))
                    }
                })
                .with_id("queued"),
            )
            .await
            .unwrap();
        assert_eq!(scheduler.task_state("queued").await, Some(TaskState::Ready));

        assert!(scheduler.cancel("queued").await.unwrap());
        assert!(!scheduler.cancel("queued").await.unwrap());

        let stats = scheduler.shutdown(true).await.unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), 0);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(
            scheduler.task_state("queued").await,
            Some(TaskState::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_cancel_running_task_without_interruption() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(1).with_listener(recorder.clone());

        scheduler.submit(sleeper(80).with_id("slow")).await.unwrap();
        assert_eq!(scheduler.task_state("slow").await, Some(TaskState::Running));
        assert!(!scheduler.cancel("slow").await.unwrap());

        let stats = scheduler.shutdown(true).await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.cancelled, 0);
        assert_eq!(*recorder.completed.lock().unwrap(), vec!["slow".to_string()]);
        assert!(recorder.cancelled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_running_task_with_interruptible_executor() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = Scheduler::from_config(
            config(1, PolicyKind::Fifo),
            Arc::new(InProcessExecutor::new().interruptible(true)),
        )
        .with_listener(recorder.clone());

        scheduler.submit(sleeper(5_000).with_id("slow")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(scheduler.cancel("slow").await.unwrap());
        assert_eq!(
            scheduler.task_state("slow").await,
            Some(TaskState::Cancelled)
        );

        let stats = scheduler.shutdown(true).await.unwrap();
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.completed + stats.failed, 0);
        assert_eq!(*recorder.cancelled.lock().unwrap(), vec!["slow".to_string()]);
        assert!(recorder.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_and_finished_tasks() {
        let scheduler = scheduler(1);
        let mut events = scheduler.subscribe();
        assert!(matches!(
            scheduler.cancel("ghost").await,
            Err(SchedulerError::TaskNotFound { .. })
        ));

        scheduler.submit(sleeper(1).with_id("done")).await.unwrap();
        wait_terminal(&mut events, "done").await;
        assert!(!scheduler.cancel("done").await.unwrap());
    }

    #[tokio::test]
    async fn test_timeout_counts_toward_retries() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(1).with_listener(recorder.clone());
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&attempts);
        scheduler
            .submit(
                TaskSpec::from_fn(move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        Ok::<_, anyhow::Error>(json!(null))
                    }
                })
                .with_id("slow")
                .with_timeout(Duration::from_millis(40))
                .with_max_retries(1),
            )
            .await
            .unwrap();

        let stats = scheduler.shutdown(true).await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(scheduler.task_state("slow").await, Some(TaskState::TimedOut));
        assert_eq!(
            *recorder.errors.lock().unwrap(),
            vec![("slow".to_string(), "timed_out".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failed_attempts_retry_in_place() {
        let scheduler = scheduler(2);
        let mut events = scheduler.subscribe();
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&attempts);
        let id = scheduler
            .submit(
                TaskSpec::from_fn(move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(anyhow::anyhow!("503 service unavailable"))
                        } else {
                            Ok::<_, anyhow::Error>(json!("recovered"))
                        }
                    }
                })
                .with_max_retries(2),
            )
            .await
            .unwrap();

        match wait_terminal(&mut events, &id).await {
            TaskEvent::Completed { attempt, output, .. } => {
                assert_eq!(attempt, 2);
                assert_eq!(output, json!("recovered"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let stats = scheduler.get_stats().await;
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_finalize_as_failed() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(1).with_listener(recorder.clone());

        scheduler
            .submit(failing().with_id("bad").with_max_retries(2))
            .await
            .unwrap();

        let stats = scheduler.shutdown(true).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(
            *recorder.errors.lock().unwrap(),
            vec![("bad".to_string(), "failed".to_string())]
        );
    }

    #[tokio::test]
    async fn test_worker_pool_respects_max_concurrent() {
        let scheduler = scheduler(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            scheduler
                .submit(TaskSpec::from_fn(move || {
                    let active = Arc::clone(&active);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(json!(null))
                    }
                }))
                .await
                .unwrap();
            assert!(scheduler.get_stats().await.running <= 2);
        }

        let stats = scheduler.shutdown(true).await.unwrap();
        assert_eq!(stats.completed, 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_priority_policy_orders_ready_tasks() {
        let scheduler = Scheduler::from_config(
            config(1, PolicyKind::Priority),
            Arc::new(InProcessExecutor::new()),
        );
        let log: Log = Arc::default();

        scheduler.submit(recording(&log, "blocker", 50)).await.unwrap();
        for (name, priority) in [("p5", 5), ("p1", 1), ("p3", 3)] {
            scheduler
                .submit(recording(&log, name, 1).with_priority(priority))
                .await
                .unwrap();
        }
        scheduler.shutdown(true).await.unwrap();

        let starts: Vec<String> = log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.strip_prefix("start:").map(str::to_string))
            .collect();
        assert_eq!(starts, vec!["blocker", "p1", "p3", "p5"]);
    }

    #[tokio::test]
    async fn test_invalid_submissions_are_rejected() {
        let scheduler = scheduler(1);

        let missing_run = scheduler.submit(TaskSpec::new().with_id("x")).await;
        assert!(matches!(missing_run, Err(SchedulerError::InvalidTask(_))));

        let unknown = scheduler.submit(sleeper(1).depends_on(["ghost"])).await;
        assert!(matches!(unknown, Err(SchedulerError::InvalidTask(_))));

        let cyclic = scheduler.submit(sleeper(1).with_id("self").depends_on(["self"])).await;
        assert!(matches!(
            cyclic,
            Err(SchedulerError::CyclicDependency { .. })
        ));

        assert_eq!(scheduler.get_stats().await.submitted, 0);
    }

    #[tokio::test]
    async fn test_stats_are_idempotent() {
        let scheduler = scheduler(1);
        scheduler.submit(sleeper(50)).await.unwrap();
        scheduler.submit(sleeper(50)).await.unwrap();

        let first = scheduler.get_stats().await;
        let second = scheduler.get_stats().await;
        assert_eq!(first, second);
        assert_eq!(first.running + first.queued, 2);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_refused() {
        let scheduler = scheduler(1);
        scheduler.shutdown(false).await.unwrap();

        assert!(!scheduler.is_accepting());
        assert!(matches!(
            scheduler.submit(sleeper(1)).await,
            Err(SchedulerError::ShuttingDown)
        ));
    }

    /// 在发布 `Submitted` 事件时阻塞，拉长提交与统计发布之间的窗口
    struct SlowSubmitListener;

    impl TaskEventListener for SlowSubmitListener {
        fn on_event(&self, event: &TaskEvent) {
            if matches!(event, TaskEvent::Submitted { .. }) {
                std::thread::sleep(Duration::from_millis(200));
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_waits_for_concurrently_submitted_task() {
        let scheduler = scheduler(2).with_listener(Arc::new(SlowSubmitListener));
        let finished = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&finished);
        let task = TaskSpec::from_fn(move || {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(json!("done"))
            }
        })
        .with_id("in-flight");

        let submitter = scheduler.clone();
        let submitted = tokio::spawn(async move { submitter.submit(task).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = scheduler.shutdown(true).await.unwrap();
        assert!(submitted.await.unwrap().is_ok());
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.running, 0);
    }

    /// 中断需要较长时间的执行器，例如需要通知隔离进程
    struct SlowCancelExecutor {
        inner: InProcessExecutor,
    }

    #[async_trait]
    impl TaskExecutor for SlowCancelExecutor {
        fn name(&self) -> &str {
            "slow-cancel"
        }

        async fn execute(&self, request: ExecutionRequest) -> TaskRunResult {
            self.inner.execute(request).await
        }

        fn supports_interruption(&self) -> bool {
            true
        }

        async fn cancel(&self, task_id: &str) -> bool {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.inner.cancel(task_id).await
        }

        async fn is_running(&self, task_id: &str) -> bool {
            self.inner.is_running(task_id).await
        }
    }

    #[tokio::test]
    async fn test_slow_interruption_does_not_block_bookkeeping() {
        let scheduler = Scheduler::from_config(
            config(2, PolicyKind::Fifo),
            Arc::new(SlowCancelExecutor {
                inner: InProcessExecutor::new().interruptible(true),
            }),
        );
        scheduler.submit(sleeper(5_000).with_id("slow")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let canceller = scheduler.clone();
        let cancel = tokio::spawn(async move { canceller.cancel("slow").await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = tokio::time::timeout(Duration::from_millis(100), scheduler.get_stats())
            .await
            .expect("stats must not wait for the executor to interrupt");
        assert_eq!(stats.running, 1);
        let quick = tokio::time::timeout(
            Duration::from_millis(100),
            scheduler.submit(sleeper(1).with_id("quick")),
        )
        .await
        .expect("submit must not wait for the executor to interrupt");
        assert!(quick.is_ok());

        assert!(cancel.await.unwrap().unwrap());
        assert_eq!(
            scheduler.task_state("slow").await,
            Some(TaskState::Cancelled)
        );
    }
}
