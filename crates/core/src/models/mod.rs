//! # 数据模型
//!
//! 任务、调度统计、提供者与死信条目。时间字段统一使用 `DateTime<Utc>`，
//! 状态字段使用枚举避免无效值；对外交换的结构实现 serde。

pub mod dead_letter;
pub mod provider;
pub mod stats;
pub mod task;

pub use dead_letter::DeadLetterEntry;
pub use provider::{ProviderConfig, ProviderStatus};
pub use stats::SchedulerStats;
pub use task::{Task, TaskFn, TaskId, TaskOutput, TaskRunResult, TaskSpec, TaskState};
