use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use resilient_core::{
    models::{Task, TaskId, TaskState},
    SchedulerError, SchedulerResult,
};

/// 依赖检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCheckResult {
    pub can_execute: bool,
    pub blocking_dependencies: Vec<TaskId>,
}

/// 依赖校验与就绪判断，不持有状态，由任务图在锁内调用
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyChecker;

impl DependencyChecker {
    pub fn new() -> Self {
        Self
    }

    /// 提交时校验依赖：自依赖与环为 `CyclicDependency`，从未提交过的依赖为 `InvalidTask`
    pub fn validate_dependencies(
        &self,
        task_id: &str,
        dependencies: &BTreeSet<TaskId>,
        live: &HashMap<TaskId, Task>,
        retired: &HashMap<TaskId, TaskState>,
    ) -> SchedulerResult<()> {
        if dependencies.contains(task_id) {
            warn!("任务 {} 依赖自身", task_id);
            return Err(SchedulerError::CyclicDependency {
                task_id: task_id.to_string(),
            });
        }

        for dep in dependencies {
            if !live.contains_key(dep) && !retired.contains_key(dep) {
                return Err(SchedulerError::InvalidTask(format!(
                    "任务 {task_id} 的依赖 {dep} 不存在"
                )));
            }
        }

        if self.detect_circular_dependency(task_id, dependencies, live) {
            warn!("检测到循环依赖: 任务 {}", task_id);
            return Err(SchedulerError::CyclicDependency {
                task_id: task_id.to_string(),
            });
        }

        debug!("任务 {} 的依赖校验通过: {:?}", task_id, dependencies);
        Ok(())
    }

    /// 在新任务可达的依赖子图上做拓扑排序，无法排完即存在环
    pub fn detect_circular_dependency(
        &self,
        task_id: &str,
        dependencies: &BTreeSet<TaskId>,
        live: &HashMap<TaskId, Task>,
    ) -> bool {
        let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();
        graph.insert(task_id, dependencies.iter().map(String::as_str).collect());

        let mut queue: VecDeque<&str> = dependencies.iter().map(String::as_str).collect();
        while let Some(node) = queue.pop_front() {
            if graph.contains_key(node) {
                continue;
            }
            let edges: Vec<&str> = live
                .get(node)
                .map(|t| t.depends_on.iter().map(String::as_str).collect())
                .unwrap_or_default();
            queue.extend(edges.iter().copied());
            graph.insert(node, edges);
        }

        topological_sort_cycle_detection(&graph)
    }

    pub fn check_dependencies(
        &self,
        dependencies: &BTreeSet<TaskId>,
        completed: &HashSet<TaskId>,
    ) -> DependencyCheckResult {
        let blocking_dependencies: Vec<TaskId> = dependencies
            .iter()
            .filter(|dep| !completed.contains(*dep))
            .cloned()
            .collect();
        DependencyCheckResult {
            can_execute: blocking_dependencies.is_empty(),
            blocking_dependencies,
        }
    }

    /// 就绪当且仅当所有依赖都已完成
    pub fn is_ready(&self, dependencies: &BTreeSet<TaskId>, completed: &HashSet<TaskId>) -> bool {
        dependencies.iter().all(|dep| completed.contains(dep))
    }

    /// 沿反向依赖做 BFS，返回所有直接和间接下游任务
    pub fn transitive_dependents(
        &self,
        task_id: &str,
        dependents: &HashMap<TaskId, BTreeSet<TaskId>>,
    ) -> Vec<TaskId> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut result = Vec::new();

        if let Some(direct) = dependents.get(task_id) {
            for dep in direct {
                if visited.insert(dep.clone()) {
                    queue.push_back(dep.clone());
                }
            }
        }
        while let Some(current) = queue.pop_front() {
            if let Some(next) = dependents.get(&current) {
                for dep in next {
                    if visited.insert(dep.clone()) {
                        queue.push_back(dep.clone());
                    }
                }
            }
            result.push(current);
        }
        result
    }
}

fn topological_sort_cycle_detection(graph: &HashMap<&str, Vec<&str>>) -> bool {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut queue = VecDeque::new();
    for &node in graph.keys() {
        in_degree.entry(node).or_insert(0);
    }

    for dependencies in graph.values() {
        for &dep in dependencies {
            *in_degree.entry(dep).or_insert(0) += 1;
        }
    }
    for (&node, &degree) in &in_degree {
        if degree == 0 {
            queue.push_back(node);
        }
    }

    let mut processed_count = 0;
    while let Some(node) = queue.pop_front() {
        processed_count += 1;

        if let Some(dependencies) = graph.get(node) {
            for &dep in dependencies {
                if let Some(degree) = in_degree.get_mut(dep) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dep);
                    }
                }
            }
        }
    }
    processed_count < in_degree.len()
}
