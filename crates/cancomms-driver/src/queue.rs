//! 接收线程与分发线程之间的有界帧队列
//!
//! 基于 `crossbeam_channel::bounded`：队列满时生产者阻塞（背压），
//! 从不丢帧；消费者按超时轮询。

use cancomms_can::CanMessage;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::time::Duration;

/// 默认队列容量
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// 有界 FIFO 帧队列
///
/// 多生产者多消费者安全；`Clone` 共享同一条通道。
#[derive(Debug, Clone)]
pub struct FrameQueue {
    tx: Sender<CanMessage>,
    rx: Receiver<CanMessage>,
    capacity: usize,
}

impl FrameQueue {
    /// 创建容量为 `capacity` 的队列（最小为 1）
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// 阻塞入队，直到有空位
    pub fn push(&self, message: CanMessage) {
        // 两端都由 self 持有，不会 Disconnected
        let _ = self.tx.send(message);
    }

    /// 限时入队
    ///
    /// 超时时把帧交还给调用方，以便其检查停止标志后重试。
    pub fn push_timeout(&self, message: CanMessage, timeout: Duration) -> Result<(), CanMessage> {
        match self.tx.send_timeout(message, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(message)) | Err(SendTimeoutError::Disconnected(message)) => {
                Err(message)
            },
        }
    }

    /// 限时出队，超时返回 `None`
    pub fn poll_timeout(&self, timeout: Duration) -> Option<CanMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 丢弃所有排队的帧，返回丢弃数量
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
