use std::fmt;

/// 单个分片的缓冲/写入块大小: 1MB
pub const STREAM_CHUNK_SIZE: usize = 1024 * 1024;

/// 分片状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceStatus {
    /// 等待下载
    Pending,
    /// 下载中
    InFlight,
    /// 下载成功
    Succeeded,
    /// 重试耗尽后失败
    Failed,
}

impl fmt::Display for SliceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SliceStatus::Pending => "pending",
            SliceStatus::InFlight => "in-flight",
            SliceStatus::Succeeded => "succeeded",
            SliceStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 分片描述
///
/// `start` / `end` 都是闭区间端点，与 HTTP Range 头的语义一致。
/// 分片通过任务队列按值交给 worker，同一时间只会被一个 worker 持有。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceDescriptor {
    /// 序号（从 1 开始）
    pub seq: usize,
    /// 起始偏移（含）
    pub start: u64,
    /// 结束偏移（含）
    pub end: u64,
    /// 状态
    pub status: SliceStatus,
}

impl SliceDescriptor {
    pub fn new(seq: usize, start: u64, end: u64) -> Self {
        Self {
            seq,
            start,
            end,
            status: SliceStatus::Pending,
        }
    }

    /// 分片字节数
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Range 请求头的值，如 `bytes=0-1048575`
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    pub fn mark_in_flight(&mut self) {
        self.status = SliceStatus::InFlight;
    }

    pub fn mark_succeeded(&mut self) {
        self.status = SliceStatus::Succeeded;
    }

    pub fn mark_failed(&mut self) {
        self.status = SliceStatus::Failed;
    }
}

/// 计算分片
///
/// 不支持 Range 时整个文件作为一个分片 `[0, total_size - 1]`。
/// 最后一个分片的结束位置截断到 `total_size - 1`，不会越过文件末尾。
/// 调用方保证 `total_size > 0` 且 `slice_size > 0`。
pub fn build_slices(total_size: u64, slice_size: u64, ranged: bool) -> Vec<SliceDescriptor> {
    if !ranged {
        return vec![SliceDescriptor::new(1, 0, total_size - 1)];
    }

    let count = total_size.div_ceil(slice_size);
    (0..count)
        .map(|i| {
            let start = i * slice_size;
            let end = std::cmp::min(start + slice_size, total_size) - 1;
            SliceDescriptor::new(i as usize + 1, start, end)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_slice_creation() {
        let slice = SliceDescriptor::new(1, 0, 1023);
        assert_eq!(slice.len(), 1024);
        assert_eq!(slice.status, SliceStatus::Pending);
        assert_eq!(slice.range_header(), "bytes=0-1023");
    }

    #[test]
    fn test_ten_mb_in_three_mb_slices() {
        let slices = build_slices(10 * MB, 3 * MB, true);
        let bounds: Vec<(u64, u64)> = slices.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(
            bounds,
            vec![
                (0, 3145727),
                (3145728, 6291455),
                (6291456, 9437183),
                (9437184, 10485759),
            ]
        );
        assert_eq!(slices.iter().map(|s| s.seq).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_exact_multiple() {
        let slices = build_slices(100, 10, true);
        assert_eq!(slices.len(), 10);
        assert_eq!(slices[9].start, 90);
        assert_eq!(slices[9].end, 99);
    }

    #[test]
    fn test_whole_body_slice() {
        let slices = build_slices(12345, 10, false);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].start, 0);
        assert_eq!(slices[0].end, 12344);
    }

    #[test]
    fn test_status_transitions() {
        let mut slice = SliceDescriptor::new(3, 10, 19);
        slice.mark_in_flight();
        assert_eq!(slice.status, SliceStatus::InFlight);
        slice.mark_failed();
        assert_eq!(slice.status.to_string(), "failed");
    }

    proptest! {
        #[test]
        fn prop_slices_cover_range_exactly_once(
            total in 1u64..50_000_000,
            slice in 1u64..5_000_000,
        ) {
            let slices = build_slices(total, slice, true);

            prop_assert_eq!(slices.len() as u64, total.div_ceil(slice));
            prop_assert_eq!(slices[0].start, 0);
            prop_assert_eq!(slices.last().unwrap().end, total - 1);

            for pair in slices.windows(2) {
                prop_assert_eq!(pair[1].start, pair[0].end + 1);
                prop_assert_eq!(pair[1].seq, pair[0].seq + 1);
            }

            let covered: u64 = slices.iter().map(|s| s.len()).sum();
            prop_assert_eq!(covered, total);
        }
    }
}
