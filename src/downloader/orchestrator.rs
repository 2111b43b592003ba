use super::error::{DownloadError, Result};
use super::output::{prepare_output_file, remove_output_file};
use super::planner::DownloadPlan;
use super::slice::SliceDescriptor;
use super::transport::{SliceTransporter, TransferOutcome};
use parking_lot::Mutex as SyncMutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 共享的失败信号
///
/// 任意 worker 失败都会置位；只保留第一个错误，之后的失败不会覆盖。
#[derive(Debug, Default)]
pub struct FailureSignal {
    failed: AtomicBool,
    first: SyncMutex<Option<DownloadError>>,
}

impl FailureSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录失败，返回该错误是否成为第一个错误
    pub fn record(&self, err: DownloadError) -> bool {
        let mut slot = self.first.lock();
        self.failed.store(true, Ordering::SeqCst);
        if slot.is_none() {
            *slot = Some(err);
            true
        } else {
            false
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// 取出第一个错误
    pub fn take(&self) -> Option<DownloadError> {
        self.first.lock().take()
    }
}

/// 下载完成报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// 输出文件
    pub output_path: PathBuf,
    /// 文件大小
    pub total_size: u64,
    /// 分片数量
    pub slice_count: usize,
    /// 已处理分片数
    pub completed: usize,
    /// 是否分片下载
    pub ranged: bool,
    /// 耗时
    pub elapsed: Duration,
}

/// worker 共享的运行上下文
struct RunContext {
    url: String,
    ranged: bool,
    file: Arc<std::fs::File>,
    queue: Mutex<mpsc::Receiver<SliceDescriptor>>,
    completed: Arc<AtomicUsize>,
    failure: FailureSignal,
    transporter: SliceTransporter,
    cancel: CancellationToken,
}

/// 下载编排器
///
/// 预分配输出文件，把所有分片放入有界队列，由固定数量的 worker 竞争消费。
/// 单个分片失败不会提前终止其他分片，所有分片都有结果后再决定保留还是删除文件。
#[derive(Debug, Clone)]
pub struct Orchestrator {
    transporter: SliceTransporter,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(transporter: SliceTransporter, cancel: CancellationToken) -> Self {
        Self { transporter, cancel }
    }

    /// 执行下载计划
    ///
    /// 成功时输出文件保留；任一分片最终失败时删除输出文件并返回第一个分片错误。
    /// 无论成功与否，返回时 `plan.completed_count()` 都等于分片总数。
    pub async fn run(&self, plan: &DownloadPlan, pool_size: usize) -> Result<DownloadReport> {
        if pool_size == 0 {
            return Err(DownloadError::InvalidRequest("worker 数必须至少为 1".to_string()));
        }

        let started = Instant::now();
        let total = plan.slice_count();
        let file = prepare_output_file(&plan.output_path, plan.total_size).await?;

        // 同一个计划可以重复执行，每次运行重新计数
        let completed = plan.completed_counter();
        completed.store(0, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel::<SliceDescriptor>(pool_size);
        let ctx = Arc::new(RunContext {
            url: plan.url.clone(),
            ranged: plan.ranged,
            file,
            queue: Mutex::new(rx),
            completed,
            failure: FailureSignal::new(),
            transporter: self.transporter.clone(),
            cancel: self.cancel.clone(),
        });

        // 按序号入队，全部入队后关闭队列，worker 读到 None 即退出
        let slices = plan.slices.clone();
        let producer = tokio::spawn(async move {
            for slice in slices {
                if tx.send(slice).await.is_err() {
                    break;
                }
            }
        });

        info!(
            "开始下载 {} 个分片 ({} 个 worker, 分片下载={})",
            total, pool_size, plan.ranged
        );

        let workers: Vec<_> = (1..=pool_size)
            .map(|worker_id| {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move { worker_loop(worker_id, ctx).await })
            })
            .collect();

        for handle in workers {
            if let Err(e) = handle.await {
                error!("下载 worker 异常退出: {}", e);
                ctx.failure.record(DownloadError::WorkerAborted(e.to_string()));
            }
        }
        // worker 全部异常退出时入队任务可能阻塞在已满的队列上
        producer.abort();
        if let Err(e) = producer.await {
            if e.is_panic() {
                error!("分片入队任务异常退出: {}", e);
                ctx.failure.record(DownloadError::WorkerAborted(e.to_string()));
            }
        }

        let completed = plan.completed_count();
        if completed != total {
            ctx.failure.record(DownloadError::WorkerAborted(format!(
                "完成分片数 {} 与分片总数 {} 不一致",
                completed, total
            )));
        }

        let failed = ctx.failure.is_failed();
        let first_error = ctx.failure.take();
        // 释放文件句柄后再清理
        drop(ctx);

        if failed {
            let err = first_error
                .unwrap_or_else(|| DownloadError::WorkerAborted("未知错误".to_string()));
            error!("文件[{}]下载错误: {}", plan.url, err);
            remove_output_file(&plan.output_path).await;
            return Err(err);
        }

        let report = DownloadReport {
            output_path: plan.output_path.clone(),
            total_size: plan.total_size,
            slice_count: total,
            completed,
            ranged: plan.ranged,
            elapsed: started.elapsed(),
        };
        info!(
            "✅ 文件下载完成: {:?}, {} bytes, {} 个分片, 耗时 {:.2}s",
            report.output_path,
            report.total_size,
            report.slice_count,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }
}

/// worker 主循环：从队列取分片直到队列关闭且为空
async fn worker_loop(worker_id: usize, ctx: Arc<RunContext>) {
    loop {
        let next = { ctx.queue.lock().await.recv().await };
        let Some(mut slice) = next else {
            debug!("[worker {}] 队列已清空，退出", worker_id);
            return;
        };

        let outcome = ctx
            .transporter
            .transfer_with_retry(&ctx.file, &ctx.url, &mut slice, ctx.ranged, &ctx.cancel)
            .await;
        record_outcome(worker_id, &ctx, outcome);

        ctx.completed.fetch_add(1, Ordering::SeqCst);
    }
}

fn record_outcome(worker_id: usize, ctx: &RunContext, outcome: TransferOutcome) {
    let TransferOutcome {
        seq,
        attempts,
        bytes,
        error,
        ..
    } = outcome;

    match error {
        None => {
            info!(
                "[worker {}] ✓ 分片 #{} 下载成功 ({} bytes, 尝试 {} 次)",
                worker_id, seq, bytes, attempts
            );
        }
        Some(DownloadError::Cancelled) => {
            warn!("[worker {}] 分片 #{} 已取消", worker_id, seq);
            ctx.failure.record(DownloadError::Cancelled);
        }
        Some(err) => {
            error!(
                "[worker {}] ✗ 分片 #{} 下载失败 (尝试 {} 次): {}",
                worker_id, seq, attempts, err
            );
            ctx.failure.record(DownloadError::SliceFailed {
                seq,
                attempts,
                source: Box::new(err),
            });
        }
    }
}
