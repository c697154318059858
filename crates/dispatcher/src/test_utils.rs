#[cfg(test)]
pub mod builders {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use futures::FutureExt;
    use resilient_core::{Task, TaskState};
    use serde_json::json;

    /// 测试用的任务构造器
    pub struct TaskBuilder {
        task: Task,
    }

    impl TaskBuilder {
        pub fn new(id: &str, seq: u64) -> Self {
            Self {
                task: Task {
                    id: id.to_string(),
                    run: Arc::new(|| async { Ok::<_, anyhow::Error>(json!(null)) }.boxed()),
                    priority: 0,
                    depends_on: BTreeSet::new(),
                    timeout: Duration::from_secs(30),
                    retry_count: 0,
                    max_retries: 0,
                    created_at: Utc::now(),
                    seq,
                    estimated_duration: None,
                    deadline: None,
                    cpu_affinity: None,
                    state: TaskState::Ready,
                },
            }
        }

        pub fn priority(mut self, priority: i32) -> Self {
            self.task.priority = priority;
            self
        }

        pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
            self.task.created_at = created_at;
            self
        }

        pub fn estimated(mut self, estimated: Duration) -> Self {
            self.task.estimated_duration = Some(estimated);
            self
        }

        pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
            self.task.deadline = Some(deadline);
            self
        }

        pub fn build(self) -> Task {
            self.task
        }
    }
}
