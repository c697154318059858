use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use tokio::signal;
use tracing::{info, warn};

use resilient_scheduler::app::Application;
use resilient_scheduler::common::{init_logging, load_config, StartupConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("resilient-scheduler")
        .version("1.0.0")
        .about("弹性任务执行核心")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .global(true),
        )
        .subcommand(Command::new("run").about("启动调度引擎，收到关闭信号后优雅退出"))
        .subcommand(Command::new("status").about("以JSON输出熔断器、提供者与队列状态"))
        .subcommand(Command::new("reset").about("清除全部熔断状态"))
        .subcommand(Command::new("dead-letters").about("以JSON输出死信条目"))
        .get_matches();

    let startup = startup_config(&matches);
    let config = load_config(&startup)?;
    init_logging(&config.logging.level, &config.logging.format)?;

    let app = Application::new(config).await?;

    match matches.subcommand_name() {
        Some("status") => print_json(&app.status().await)?,
        Some("reset") => {
            app.reset().await?;
            print_json(&app.status().await.circuits)?;
        }
        Some("dead-letters") => print_json(&app.dead_letters().list().await)?,
        _ => run(app).await?,
    }

    Ok(())
}

fn startup_config(matches: &ArgMatches) -> StartupConfig {
    StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value).context("序列化输出失败")?;
    println!("{output}");
    Ok(())
}

async fn run(app: Application) -> Result<()> {
    info!("弹性任务执行核心已启动");

    wait_for_shutdown_signal().await?;
    info!("收到关闭信号，开始优雅关闭...");

    match tokio::time::timeout(Duration::from_secs(30), app.shutdown(true)).await {
        Ok(result) => {
            let stats = result?;
            info!(
                "应用已优雅关闭: completed={}, failed={}, timed_out={}",
                stats.completed, stats.failed, stats.timed_out
            );
        }
        Err(_) => {
            warn!("应用关闭超时，强制退出");
        }
    }
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("安装Ctrl+C信号处理器失败")?;
                info!("收到Ctrl+C信号");
            },
            _ = terminate.recv() => {
                info!("收到SIGTERM信号");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("安装Ctrl+C信号处理器失败")?;
        info!("收到Ctrl+C信号");
    }

    Ok(())
}
