//! 输出文件操作
//!
//! 所有 worker 共享同一个文件句柄，只使用带偏移的写入（pwrite），
//! 不依赖共享的文件游标，因此不同分片的写入互不干扰。

use super::error::{DownloadError, Result};
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// 创建输出文件并预分配空间
///
/// 在任何分片开始写入之前完成，避免并发写入时扩展文件产生竞争。
pub async fn prepare_output_file(path: &Path, size: u64) -> Result<Arc<File>> {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(path)
        .await
        .map_err(DownloadError::FilePrepare)?;
    file.set_len(size).await.map_err(DownloadError::FilePrepare)?;

    info!("文件准备完成: {:?}, 大小: {} bytes", path, size);
    Ok(Arc::new(file.into_std().await))
}

/// 在指定偏移写入全部数据
#[cfg(unix)]
pub fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

/// 在指定偏移写入全部数据
#[cfg(windows)]
pub fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "写入 0 字节"));
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// 在阻塞线程池中执行偏移写入，返回写入后的下一个偏移
pub async fn write_chunk_at(file: &Arc<File>, chunk: Vec<u8>, offset: u64) -> Result<u64> {
    let file = Arc::clone(file);
    let len = chunk.len() as u64;

    tokio::task::spawn_blocking(move || write_all_at(&file, &chunk, offset))
        .await
        .map_err(|e| DownloadError::StreamWriteFailed {
            offset,
            source: io::Error::new(io::ErrorKind::Other, e),
        })?
        .map_err(|source| DownloadError::StreamWriteFailed { offset, source })?;

    Ok(offset + len)
}

/// 删除下载失败的文件（尽力而为，失败只记录日志）
pub async fn remove_output_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("已清理下载失败的文件: {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("错误文件[{:?}]清理失败: {}", path, e),
    }
}
