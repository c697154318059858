use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use resilient_core::{
    models::{Task, TaskId},
    traits::{PolicyKind, SchedulingPolicy},
};

/// 最早提交优先，同一时间戳按提交顺序
#[derive(Debug, Default)]
pub struct FifoPolicy;

/// 预估耗时最短优先，未设置预估耗时视为无穷大
#[derive(Debug, Default)]
pub struct ShortestJobFirstPolicy;

/// 截止时间最早优先，未设置截止时间视为无穷大
#[derive(Debug, Default)]
pub struct EarliestDeadlinePolicy;

/// 数值越小越紧急，同优先级按 FIFO
#[derive(Debug, Default)]
pub struct PriorityPolicy;

/// 时间片轮转
///
/// 维护一个轮转游标；每次选中都会累加该任务的时间片计数，计数用尽的任务
/// 会让位给游标之后的就绪任务，并重新获得时间片。这是调度决策边界上的
/// 协作式让位，已派发的任务仍然一次运行到底。
#[derive(Debug)]
pub struct RoundRobinPolicy {
    time_slice: u32,
    cursor: usize,
    slices: HashMap<TaskId, u32>,
}

impl RoundRobinPolicy {
    pub fn new(time_slice: u32) -> Self {
        Self {
            time_slice: time_slice.max(1),
            cursor: 0,
            slices: HashMap::new(),
        }
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SchedulingPolicy for FifoPolicy {
    fn name(&self) -> &str {
        "fifo"
    }

    fn select(&mut self, ready: &[&Task]) -> Option<usize> {
        position_of_min(ready, |t| (t.created_at, t.seq))
    }
}

impl SchedulingPolicy for ShortestJobFirstPolicy {
    fn name(&self) -> &str {
        "sjf"
    }

    fn select(&mut self, ready: &[&Task]) -> Option<usize> {
        position_of_min(ready, |t| {
            (t.estimated_duration.unwrap_or(Duration::MAX), t.seq)
        })
    }
}

impl SchedulingPolicy for EarliestDeadlinePolicy {
    fn name(&self) -> &str {
        "edf"
    }

    fn select(&mut self, ready: &[&Task]) -> Option<usize> {
        position_of_min(ready, |t| (t.deadline.is_none(), t.deadline, t.seq))
    }
}

impl SchedulingPolicy for PriorityPolicy {
    fn name(&self) -> &str {
        "priority"
    }

    fn select(&mut self, ready: &[&Task]) -> Option<usize> {
        position_of_min(ready, |t| (t.priority, t.created_at, t.seq))
    }
}

impl SchedulingPolicy for RoundRobinPolicy {
    fn name(&self) -> &str {
        "round_robin"
    }

    fn select(&mut self, ready: &[&Task]) -> Option<usize> {
        if ready.is_empty() {
            return None;
        }
        let len = ready.len();
        let mut index = self.cursor % len;

        for _ in 0..len {
            let used = self.slices.entry(ready[index].id.clone()).or_insert(0);
            if *used < self.time_slice {
                *used += 1;
                self.cursor = index;
                return Some(index);
            }
            // 时间片用尽：让位给后面的就绪任务
            debug!(
                "轮转策略: 任务 {} 时间片用尽，让位 ({}/{})",
                ready[index].id, index, len
            );
            *used = 0;
            index = (index + 1) % len;
        }

        // 所有任务都刚刚重置了时间片
        let used = self.slices.entry(ready[index].id.clone()).or_insert(0);
        *used += 1;
        self.cursor = index;
        Some(index)
    }

    fn forget(&mut self, task_id: &str) {
        self.slices.remove(task_id);
    }
}

fn position_of_min<K: Ord>(ready: &[&Task], key: impl Fn(&Task) -> K) -> Option<usize> {
    ready
        .iter()
        .enumerate()
        .min_by_key(|(_, task)| key(task))
        .map(|(index, _)| index)
}

/// 按配置创建调度策略
pub fn create_policy(kind: PolicyKind, time_slice: u32) -> Box<dyn SchedulingPolicy> {
    match kind {
        PolicyKind::Fifo => Box::new(FifoPolicy),
        PolicyKind::Sjf => Box::new(ShortestJobFirstPolicy),
        PolicyKind::RoundRobin => Box::new(RoundRobinPolicy::new(time_slice)),
        PolicyKind::Edf => Box::new(EarliestDeadlinePolicy),
        PolicyKind::Priority => Box::new(PriorityPolicy),
    }
}
