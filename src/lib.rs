// Slice Downloader Library
// 多 worker 分片下载引擎

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 下载引擎模块
pub mod downloader;

// 导出常用类型
pub use config::{AppConfig, DownloadConfig, LogConfig};
pub use downloader::{
    DownloadEngine, DownloadError, DownloadPlan, DownloadReport, DownloadRequest, Orchestrator,
    Planner, RetryPolicy, SliceDescriptor, SliceStatus, SliceTransporter, TransferOutcome,
};
