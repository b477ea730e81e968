//! 运行时指标
//!
//! 所有计数器都是原子变量，可以在任意线程无锁读取。

use std::sync::atomic::{AtomicU64, Ordering};

/// Hub 运行时计数器
#[derive(Debug, Default)]
pub struct HubMetrics {
    /// 读循环收到的数据块数
    pub chunks_read: AtomicU64,
    /// 读循环收到的字节数
    pub bytes_read: AtomicU64,
    /// 解码得到的完整消息数
    pub messages_decoded: AtomicU64,
    /// 因帧头损坏被丢弃的数据块数
    pub malformed_frames: AtomicU64,
    /// 成功写出的字节数（含心跳探测）
    pub bytes_written: AtomicU64,
    /// `send` 写入失败次数
    pub write_failures: AtomicU64,
    /// 心跳探测次数
    pub heartbeat_probes: AtomicU64,
    /// 心跳探测失败次数
    pub heartbeat_failures: AtomicU64,
    pub connects_ok: AtomicU64,
    pub connects_failed: AtomicU64,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    /// 读取所有计数器的当前值
    ///
    /// 各计数器分别读取，彼此之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chunks_read: self.chunks_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            messages_decoded: self.messages_decoded.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            heartbeat_probes: self.heartbeat_probes.load(Ordering::Relaxed),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::Relaxed),
            connects_ok: self.connects_ok.load(Ordering::Relaxed),
            connects_failed: self.connects_failed.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub chunks_read: u64,
    pub bytes_read: u64,
    pub messages_decoded: u64,
    pub malformed_frames: u64,
    pub bytes_written: u64,
    pub write_failures: u64,
    pub heartbeat_probes: u64,
    pub heartbeat_failures: u64,
    pub connects_ok: u64,
    pub connects_failed: u64,
}

impl MetricsSnapshot {
    /// 被丢弃的数据块占比
    pub fn malformed_ratio(&self) -> f64 {
        if self.chunks_read == 0 {
            0.0
        } else {
            self.malformed_frames as f64 / self.chunks_read as f64
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rx: {} chunks / {} bytes / {} messages ({} malformed), tx: {} bytes ({} failed), \
             heartbeat: {} probes ({} failed), connects: {} ok / {} failed",
            self.chunks_read,
            self.bytes_read,
            self.messages_decoded,
            self.malformed_frames,
            self.bytes_written,
            self.write_failures,
            self.heartbeat_probes,
            self.heartbeat_failures,
            self.connects_ok,
            self.connects_failed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = HubMetrics::new();
        HubMetrics::incr(&metrics.chunks_read);
        HubMetrics::incr(&metrics.chunks_read);
        HubMetrics::incr(&metrics.malformed_frames);
        HubMetrics::add(&metrics.bytes_read, 42);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.chunks_read, 2);
        assert_eq!(snapshot.bytes_read, 42);
        assert!((snapshot.malformed_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_ratio() {
        assert_eq!(MetricsSnapshot::default().malformed_ratio(), 0.0);
    }
}
