//! 处理器运行指标
//!
//! 原子计数器，接收线程、分发线程和调用方线程都可以无锁更新与读取。

use std::sync::atomic::{AtomicU64, Ordering};

/// 处理器实时指标
///
/// # 使用示例
///
/// ```rust
/// use cancomms_driver::HandlerMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = HandlerMetrics::new();
/// metrics.rx_frames_total.fetch_add(1, Ordering::Relaxed);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.rx_frames_total, 1);
/// ```
#[derive(Debug, Default)]
pub struct HandlerMetrics {
    /// 从传输层收到的总帧数（数据帧 + 错误帧）
    pub rx_frames_total: AtomicU64,

    /// 接收超时次数（正常现象，总线空闲时会超时）
    pub rx_timeouts: AtomicU64,

    /// 队列满导致接收线程等待的次数
    ///
    /// 持续增长说明分发线程（通常是某个监听器）跟不上总线速率。
    pub queue_full_waits: AtomicU64,

    /// 已分发给消息监听器的数据帧
    pub data_frames_dispatched: AtomicU64,

    /// 已分发的错误帧（已识别类别）
    pub error_frames: AtomicU64,

    /// 无法识别的错误帧
    pub unrecognized_error_frames: AtomicU64,

    /// 监听器返回错误或 panic 的次数
    pub listener_failures: AtomicU64,

    /// 读取故障次数
    pub read_faults: AtomicU64,

    pub tx_frames_total: AtomicU64,

    pub tx_errors: AtomicU64,
}

impl HandlerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    ///
    /// 各计数器分别以 `Relaxed` 读取，彼此之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rx_frames_total: self.rx_frames_total.load(Ordering::Relaxed),
            rx_timeouts: self.rx_timeouts.load(Ordering::Relaxed),
            queue_full_waits: self.queue_full_waits.load(Ordering::Relaxed),
            data_frames_dispatched: self.data_frames_dispatched.load(Ordering::Relaxed),
            error_frames: self.error_frames.load(Ordering::Relaxed),
            unrecognized_error_frames: self.unrecognized_error_frames.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            read_faults: self.read_faults.load(Ordering::Relaxed),
            tx_frames_total: self.tx_frames_total.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.rx_frames_total.store(0, Ordering::Relaxed);
        self.rx_timeouts.store(0, Ordering::Relaxed);
        self.queue_full_waits.store(0, Ordering::Relaxed);
        self.data_frames_dispatched.store(0, Ordering::Relaxed);
        self.error_frames.store(0, Ordering::Relaxed);
        self.unrecognized_error_frames.store(0, Ordering::Relaxed);
        self.listener_failures.store(0, Ordering::Relaxed);
        self.read_faults.store(0, Ordering::Relaxed);
        self.tx_frames_total.store(0, Ordering::Relaxed);
        self.tx_errors.store(0, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    pub rx_frames_total: u64,
    pub rx_timeouts: u64,
    pub queue_full_waits: u64,
    pub data_frames_dispatched: u64,
    pub error_frames: u64,
    pub unrecognized_error_frames: u64,
    pub listener_failures: u64,
    pub read_faults: u64,
    pub tx_frames_total: u64,
    pub tx_errors: u64,
}

impl MetricsSnapshot {
    /// 错误帧占接收总数的百分比（0.0 - 100.0）
    pub fn error_frame_rate(&self) -> f64 {
        if self.rx_frames_total == 0 {
            return 0.0;
        }
        ((self.error_frames + self.unrecognized_error_frames) as f64
            / self.rx_frames_total as f64)
            * 100.0
    }

    /// 发送失败率（百分比）
    pub fn tx_error_rate(&self) -> f64 {
        let attempts = self.tx_frames_total + self.tx_errors;
        if attempts == 0 {
            return 0.0;
        }
        (self.tx_errors as f64 / attempts as f64) * 100.0
    }
}
