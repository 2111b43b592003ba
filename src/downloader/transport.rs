use super::error::{DownloadError, Result};
use super::output::write_chunk_at;
use super::slice::{SliceDescriptor, SliceStatus, STREAM_CHUNK_SIZE};
use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 默认退避基数（第 n 次失败后等待 n × 100ms）
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// 重试策略：线性退避
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含第一次）
    pub max_attempts: u32,
    /// 退避基数
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// 第 `attempt` 次尝试失败后的等待时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF_BASE)
    }
}

/// 单个分片的最终结果
#[derive(Debug)]
pub struct TransferOutcome {
    /// 分片序号
    pub seq: usize,
    /// 最终状态（Succeeded / Failed）
    pub status: SliceStatus,
    /// 实际尝试次数
    pub attempts: u32,
    /// 成功时写入的字节数
    pub bytes: u64,
    /// 失败原因
    pub error: Option<DownloadError>,
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        self.status == SliceStatus::Succeeded
    }
}

/// 分片传输器
///
/// 负责单个分片的 GET 请求与流式写入，外层 [`transfer_with_retry`](Self::transfer_with_retry)
/// 在同一个 worker 内原地重试，分片不会被重新放回队列。
#[derive(Debug, Clone)]
pub struct SliceTransporter {
    client: Client,
    policy: RetryPolicy,
}

impl SliceTransporter {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// 下载分片（带重试）
    ///
    /// 只有 [`DownloadError::is_retryable`] 的错误会重试；取消立即结束。
    pub async fn transfer_with_retry(
        &self,
        file: &Arc<File>,
        url: &str,
        slice: &mut SliceDescriptor,
        ranged: bool,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        slice.mark_in_flight();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.transfer(file, url, slice, ranged, cancel).await {
                Ok(bytes) => {
                    slice.mark_succeeded();
                    return TransferOutcome {
                        seq: slice.seq,
                        status: slice.status,
                        attempts: attempt,
                        bytes,
                        error: None,
                    };
                }
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= self.policy.max_attempts {
                slice.mark_failed();
                return TransferOutcome {
                    seq: slice.seq,
                    status: slice.status,
                    attempts: attempt,
                    bytes: 0,
                    error: Some(err),
                };
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                "⚠ 分片 #{} 第 {}/{} 次下载失败，{}ms 后重试: {}",
                slice.seq,
                attempt,
                self.policy.max_attempts,
                delay.as_millis(),
                err
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    slice.mark_failed();
                    return TransferOutcome {
                        seq: slice.seq,
                        status: slice.status,
                        attempts: attempt,
                        bytes: 0,
                        error: Some(DownloadError::Cancelled),
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// 下载分片（单次尝试），返回写入的字节数
    ///
    /// 响应体按 1MB 缓冲后以偏移写入输出文件，写入范围限定在 `[slice.start, slice.end]`。
    pub async fn transfer(
        &self,
        file: &Arc<File>,
        url: &str,
        slice: &SliceDescriptor,
        ranged: bool,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let mut request = self.client.get(url);
        if ranged {
            request = request.header(RANGE, slice.range_header());
        }
        debug!(
            "下载分片 #{}: bytes={}-{}, ranged={}",
            slice.seq, slice.start, slice.end, ranged
        );

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            resp = request.send() => resp.map_err(DownloadError::TransferFailed)?,
        };

        let expected = if ranged {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        };
        let actual = resp.status();
        if actual != expected {
            // 不读取响应体，直接丢弃连接
            drop(resp);
            return Err(DownloadError::UnexpectedStatus { expected, actual });
        }

        let expected_len = slice.len();
        let mut stream = resp.bytes_stream();
        let mut buf: Vec<u8> = Vec::with_capacity(buffer_capacity(expected_len));
        let mut offset = slice.start;
        let mut received = 0u64;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = stream.next() => next,
            };

            let data = match next {
                None => break,
                Some(Ok(data)) => data,
                Some(Err(e)) => return Err(DownloadError::StreamReadFailed(e.to_string())),
            };

            received += data.len() as u64;
            if received > expected_len {
                return Err(DownloadError::StreamReadFailed(format!(
                    "响应体超出分片长度: 期望 {} bytes",
                    expected_len
                )));
            }

            let mut rest = &data[..];
            while !rest.is_empty() {
                let take = (STREAM_CHUNK_SIZE - buf.len()).min(rest.len());
                buf.extend_from_slice(&rest[..take]);
                rest = &rest[take..];

                if buf.len() == STREAM_CHUNK_SIZE {
                    offset = self.flush(file, &mut buf, offset, expected_len, cancel).await?;
                }
            }
        }

        if !buf.is_empty() {
            offset = self.flush(file, &mut buf, offset, expected_len, cancel).await?;
        }

        if received != expected_len {
            return Err(DownloadError::StreamReadFailed(format!(
                "响应体长度不足: 收到 {} bytes, 期望 {} bytes",
                received, expected_len
            )));
        }

        debug!(
            "分片 #{} 写入完成: {} bytes (offset {} -> {})",
            slice.seq, received, slice.start, offset
        );
        Ok(received)
    }

    async fn flush(
        &self,
        file: &Arc<File>,
        buf: &mut Vec<u8>,
        offset: u64,
        expected_len: u64,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let chunk = std::mem::replace(buf, Vec::with_capacity(buffer_capacity(expected_len)));
        write_chunk_at(file, chunk, offset).await
    }
}

fn buffer_capacity(slice_len: u64) -> usize {
    (slice_len.min(STREAM_CHUNK_SIZE as u64)) as usize
}
