use reqwest::StatusCode;
use thiserror::Error;

/// 下载引擎错误
///
/// 规划阶段的错误（`InvalidRequest` / `ResourceUnavailable` / `InvalidResourceSize`）
/// 直接终止整个下载；分片阶段的错误会在同一个 worker 内原地重试。
#[derive(Error, Debug)]
pub enum DownloadError {
    /// 下载请求参数不合法
    #[error("下载请求不合法: {0}")]
    InvalidRequest(String),

    /// HTTP 客户端创建失败
    #[error("创建 HTTP 客户端失败: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// 探测请求失败或响应中没有可用的长度
    #[error("资源不可用 [{url}]: {reason}")]
    ResourceUnavailable { url: String, reason: String },

    /// 服务器声明的文件大小不合法
    #[error("文件大小不合法: {0}")]
    InvalidResourceSize(i64),

    /// 输出文件创建或预分配失败
    #[error("准备输出文件失败: {0}")]
    FilePrepare(#[source] std::io::Error),

    /// 分片请求发送失败
    #[error("分片请求失败: {0}")]
    TransferFailed(#[source] reqwest::Error),

    /// 响应状态码与期望不符
    #[error("期望状态码 {expected}，实际返回 {actual}")]
    UnexpectedStatus {
        expected: StatusCode,
        actual: StatusCode,
    },

    /// 读取响应体失败（含长度与分片不符）
    #[error("读取数据流失败: {0}")]
    StreamReadFailed(String),

    /// 写入输出文件失败
    #[error("写入文件失败 (offset={offset}): {source}")]
    StreamWriteFailed {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    /// 下载被取消
    #[error("下载已被取消")]
    Cancelled,

    /// worker 异常退出（panic），部分分片没有结果
    #[error("下载 worker 异常退出: {0}")]
    WorkerAborted(String),

    /// 某个分片重试耗尽后最终失败（整体下载失败时上报的第一个错误）
    #[error("分片 #{seq} 在 {attempts} 次尝试后失败: {source}")]
    SliceFailed {
        seq: usize,
        attempts: u32,
        #[source]
        source: Box<DownloadError>,
    },
}

impl DownloadError {
    /// 是否属于可原地重试的分片级错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DownloadError::TransferFailed(_)
                | DownloadError::UnexpectedStatus { .. }
                | DownloadError::StreamReadFailed(_)
                | DownloadError::StreamWriteFailed { .. }
        )
    }

    /// 剥掉 `SliceFailed` 包装，返回最初的分片错误
    pub fn root(&self) -> &DownloadError {
        match self {
            DownloadError::SliceFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;
