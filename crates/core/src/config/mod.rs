//! 配置管理
//!
//! 配置按 默认值 → TOML 文件 → 环境变量 的顺序合并，加载后立即验证。
//! 文件中的各节是可序列化的设置结构，运行时组件使用由它们转换得到的
//! 运行时配置（`CircuitBreakerConfig`、`BackoffConfig` 等）。

pub mod models;

pub use models::*;
