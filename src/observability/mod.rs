//! 可观测性：tracing 订阅器初始化
//!
//! 默认级别 info，可用 RUST_LOG 覆盖。交互模式写入日志文件（避免破坏 TUI 画面），其余写 stderr。

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 安装全局订阅器；log_file 为 None 时输出到 stderr。重复调用不报错
pub fn init(log_file: Option<&Path>) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter());

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let _ = registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .try_init();
        }
        None => {
            let _ = registry
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init();
        }
    }
    Ok(())
}
