//! 日志系统配置
//!
//! 始终输出到控制台；启用后同时写入按天滚动的日志文件，超出保留个数的旧文件自动删除

use crate::config::LogConfig;
use std::fs;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_FILE_PREFIX: &str = "slice-downloader";

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

fn timer() -> ChronoLocal {
    ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string())
}

/// 创建按天滚动的日志文件写入器
fn build_file_appender(config: &LogConfig) -> Result<RollingFileAppender, String> {
    fs::create_dir_all(&config.log_dir)
        .map_err(|e| format!("创建日志目录失败: {:?}, 错误: {}", config.log_dir, e))?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(config.max_files.max(1))
        .build(&config.log_dir)
        .map_err(|e| format!("创建日志文件失败: {}", e))
}

/// 初始化日志系统
///
/// `RUST_LOG` 环境变量优先于配置中的日志级别。
/// 日志目录不可用时回退到仅控制台输出。
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_timer(timer())
        .with_ansi(true);

    let appender = if config.enabled {
        match build_file_appender(config) {
            Ok(appender) => Some(appender),
            Err(e) => {
                eprintln!("{}，回退到仅控制台输出", e);
                None
            }
        }
    } else {
        None
    };

    let Some(appender) = appender else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        return LogGuard { _file_guard: None };
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);

    // 文件输出层（不带 ANSI 颜色）
    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(timer())
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留文件数={}, 级别={}",
        config.log_dir, config.max_files, config.level
    );

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_file_appender_creates_dir() {
        let dir = TempDir::new().unwrap();
        let config = LogConfig {
            enabled: true,
            log_dir: dir.path().join("nested/logs"),
            ..Default::default()
        };

        assert!(build_file_appender(&config).is_ok());
        assert!(config.log_dir.is_dir());
    }

    #[test]
    fn test_build_file_appender_rejects_file_path() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let config = LogConfig {
            enabled: true,
            log_dir: blocker.join("logs"),
            ..Default::default()
        };
        assert!(build_file_appender(&config).is_err());
    }
}
