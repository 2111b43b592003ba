// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 保留的日志文件个数（按天滚动，默认 7 个）
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_max_files() -> usize {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            max_files: default_log_max_files(),
            level: default_log_level(),
        }
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadConfig {
    /// 默认保存目录
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// 分片大小 (MB)
    #[serde(default = "default_slice_size_mb")]
    pub slice_size_mb: u64,
    /// 并发 worker 数
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// 单个分片最大尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 重试退避基数（毫秒），第 n 次失败后等待 n 倍
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 单个请求超时（秒），0 表示不限制
    #[serde(default)]
    pub request_timeout_secs: u64,
    /// 整个下载的超时（秒），0 表示不限制；超时后取消所有 worker
    #[serde(default)]
    pub run_timeout_secs: u64,
    /// User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_slice_size_mb() -> u64 {
    1
}

/// 默认 worker 数：CPU 核数 × 5
fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        * 5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            slice_size_mb: default_slice_size_mb(),
            max_workers: default_max_workers(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: 0,
            run_timeout_secs: 0,
            user_agent: default_user_agent(),
        }
    }
}

impl DownloadConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.slice_size_mb == 0 {
            anyhow::bail!("分片大小必须大于 0");
        }
        if self.max_workers == 0 {
            anyhow::bail!("worker 数必须至少为 1");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("最大尝试次数必须至少为 1");
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config
            .download
            .validate()
            .context("配置文件中的下载配置验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.download.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;
        Ok(())
    }

    /// 加载配置，文件不存在时使用默认配置
    ///
    /// 文件存在但无法解析时返回默认配置和加载错误，由调用方在日志初始化后输出。
    pub async fn load_or_default(path: impl AsRef<Path>) -> (Self, Option<anyhow::Error>) {
        let path = path.as_ref();
        if !fs::try_exists(path).await.unwrap_or(false) {
            return (Self::default(), None);
        }

        match Self::load_from_file(path).await {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }
}
