use super::error::{DownloadError, Result};
use std::path::PathBuf;

const MB: u64 = 1024 * 1024;

/// 下载请求
///
/// 由调用方构造，创建后不再修改。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// 下载地址
    pub url: String,
    /// 保存目录
    pub save_dir: PathBuf,
    /// 文件名称（为空时从 URL 推导）
    pub file_name: Option<String>,
    /// 分片大小（字节）
    pub slice_size: u64,
    /// 并发 worker 数
    pub pool_size: usize,
}

impl DownloadRequest {
    /// 创建并校验下载请求
    pub fn new(
        url: impl Into<String>,
        save_dir: impl Into<PathBuf>,
        file_name: Option<String>,
        slice_size: u64,
        pool_size: usize,
    ) -> Result<Self> {
        let request = Self {
            url: url.into(),
            save_dir: save_dir.into(),
            file_name: file_name.filter(|n| !n.trim().is_empty()),
            slice_size,
            pool_size,
        };
        request.validate()?;
        Ok(request)
    }

    /// 分片大小以 MB 为单位（命令行参数的单位）
    pub fn with_slice_size_mb(
        url: impl Into<String>,
        save_dir: impl Into<PathBuf>,
        file_name: Option<String>,
        slice_size_mb: u64,
        pool_size: usize,
    ) -> Result<Self> {
        let slice_size = slice_size_mb
            .checked_mul(MB)
            .ok_or_else(|| {
                DownloadError::InvalidRequest(format!("分片大小溢出: {}MB", slice_size_mb))
            })?;
        Self::new(url, save_dir, file_name, slice_size, pool_size)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(DownloadError::InvalidRequest("url 为空".to_string()));
        }
        if reqwest::Url::parse(&self.url).is_err() {
            return Err(DownloadError::InvalidRequest(format!("url 格式错误: {}", self.url)));
        }
        if self.slice_size == 0 {
            return Err(DownloadError::InvalidRequest("分片大小必须大于 0".to_string()));
        }
        if self.pool_size == 0 {
            return Err(DownloadError::InvalidRequest("worker 数必须至少为 1".to_string()));
        }
        Ok(())
    }
}
