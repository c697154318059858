use anyhow::{Context, Result};
use resilient_core::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 通用的启动参数
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    /// 未指定时按默认路径查找，找不到则使用内置默认值
    pub config_path: Option<String>,
    /// 覆盖配置文件中的日志级别
    pub log_level: Option<String>,
    /// 覆盖配置文件中的日志格式
    pub log_format: Option<String>,
}

/// 初始化日志系统
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 加载应用配置，并应用命令行覆盖项
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let path = startup_config.config_path.as_deref();
    let mut config = AppConfig::load(path).with_context(|| match path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置失败".to_string(),
    })?;

    if let Some(level) = &startup_config.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &startup_config.log_format {
        config.logging.format = format.clone();
    }
    config.validate()?;

    Ok(config)
}
