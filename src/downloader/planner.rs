use super::error::{DownloadError, Result};
use super::request::DownloadRequest;
use super::slice::{build_slices, SliceDescriptor};
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH};
use reqwest::{Client, Url};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// 下载计划
///
/// 由 [`Planner::plan`] 生成一次，之后只读；唯一可变的是完成计数，
/// 只由编排器的 worker 原子递增。
#[derive(Debug)]
pub struct DownloadPlan {
    /// 下载地址
    pub url: String,
    /// 输出文件绝对路径
    pub output_path: PathBuf,
    /// 文件总大小
    pub total_size: u64,
    /// 是否使用 Range 分片下载
    pub ranged: bool,
    /// 分片大小
    pub slice_size: u64,
    /// 所有分片（按序号升序）
    pub slices: Vec<SliceDescriptor>,
    completed: Arc<AtomicUsize>,
}

impl DownloadPlan {
    pub fn new(
        url: String,
        output_path: PathBuf,
        total_size: u64,
        slice_size: u64,
        ranged: bool,
    ) -> Self {
        let slices = build_slices(total_size, slice_size, ranged);
        Self {
            url,
            output_path,
            total_size,
            ranged,
            slice_size,
            slices,
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 分片数量
    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    /// 已处理（成功或失败）的分片数量
    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub(crate) fn completed_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.completed)
    }
}

/// 探测结果（只取元数据，不传输响应体）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Content-Length
    pub content_length: i64,
    /// 服务器是否声明 `Accept-Ranges: bytes`
    pub accept_ranges: bool,
}

/// 下载规划器
#[derive(Debug, Clone)]
pub struct Planner {
    client: Client,
}

impl Planner {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 探测远程资源并生成下载计划
    ///
    /// 规划失败时不会创建任何文件，也不会发起数据传输。
    pub async fn plan(&self, request: &DownloadRequest) -> Result<DownloadPlan> {
        request.validate()?;

        let url = Url::parse(&request.url)
            .map_err(|e| DownloadError::InvalidRequest(format!("url 格式错误: {}", e)))?;
        let file_name = resolve_file_name(request.file_name.as_deref(), &url)?;

        let probe = self.probe(&request.url).await?;
        if probe.content_length <= 0 {
            return Err(DownloadError::InvalidResourceSize(probe.content_length));
        }
        let total_size = probe.content_length as u64;

        // 只有服务器声明支持 Range 且文件大于一个分片时才分片下载
        let ranged = probe.accept_ranges && total_size > request.slice_size;
        if !ranged {
            debug!(
                "不使用分片下载: accept_ranges={}, total_size={}, slice_size={}",
                probe.accept_ranges, total_size, request.slice_size
            );
        }

        let output_path = absolutize(&request.save_dir).join(file_name);
        let plan = DownloadPlan::new(
            request.url.clone(),
            output_path,
            total_size,
            request.slice_size,
            ranged,
        );

        info!(
            "下载计划: 文件={:?}, 大小={} bytes, 分片数={}, 分片下载={}",
            plan.output_path,
            plan.total_size,
            plan.slice_count(),
            plan.ranged
        );

        Ok(plan)
    }

    /// 发送 HEAD 请求，读取文件长度和 Range 支持情况
    pub async fn probe(&self, url: &str) -> Result<ProbeInfo> {
        let unavailable = |reason: String| DownloadError::ResourceUnavailable {
            url: url.to_string(),
            reason,
        };

        let resp = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| unavailable(format!("探测请求失败: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(unavailable(format!("探测返回状态码 {}", status)));
        }

        let content_length = parse_content_length(resp.headers())
            .ok_or_else(|| unavailable("响应中没有可用的 Content-Length".to_string()))?;

        let accept_ranges = resp
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

        debug!(
            "探测完成: {} (status={}, content-length={}, accept-ranges={})",
            url, status, content_length, accept_ranges
        );

        Ok(ProbeInfo {
            content_length,
            accept_ranges,
        })
    }
}

/// 读取 Content-Length，缺失或不是整数时返回 None
fn parse_content_length(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<i64>().ok())
}

/// 确定输出文件名：调用方指定的名称优先，否则取 URL 最后一段路径
fn resolve_file_name(explicit: Option<&str>, url: &Url) -> Result<String> {
    if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
        return Ok(name.to_string());
    }

    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .ok_or_else(|| {
            DownloadError::InvalidRequest(format!(
                "无法从 URL 推导文件名，请指定文件名称: {}",
                url
            ))
        })?;

    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let name = decoded.replace(['/', '\\'], "_");

    if name == "." || name == ".." {
        return Err(DownloadError::InvalidRequest(format!("文件名不合法: {}", name)));
    }
    Ok(name)
}

fn absolutize(dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        return dir.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(dir),
        Err(_) => dir.to_path_buf(),
    }
}
