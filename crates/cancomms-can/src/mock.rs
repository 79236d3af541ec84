//! Mock 传输层（无硬件依赖，用于测试）
//!
//! 入站帧和读取错误通过 [`MockTransport::inject_frame`] / [`MockTransport::inject_read_error`]
//! 注入，出站帧记录在内存中供断言。过滤器的匹配规则与内核一致。

use crate::{CanDeviceError, CanDeviceErrorKind, CanError, CanTransport};
use cancomms_frame::{CanFilter, CanMessage};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// 发送队列满（Linux errno）
const ENOBUFS: i32 = 105;

/// Mock 句柄
#[derive(Debug)]
pub struct MockHandle {
    device: String,
    filters: Vec<CanFilter>,
    closed: AtomicBool,
}

impl MockHandle {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn filters(&self) -> &[CanFilter] {
        &self.filters
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn accepts(&self, message: &CanMessage) -> bool {
        // 错误帧不经过 ID 过滤器（由错误掩码控制）
        message.is_error_frame()
            || self.filters.is_empty()
            || self.filters.iter().any(|f| f.matches(message.raw_id()))
    }
}

#[derive(Debug)]
struct MockState {
    inbound_tx: Sender<Result<CanMessage, CanError>>,
    inbound_rx: Receiver<Result<CanMessage, CanError>>,
    sent: Mutex<Vec<CanMessage>>,
    opened_filters: Mutex<Vec<Vec<CanFilter>>>,
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
    fail_open: AtomicBool,
    fail_transmit: AtomicBool,
    fail_close: AtomicBool,
    read_timeout: Duration,
}

/// Mock 传输层
///
/// `Clone` 共享同一份内部状态：测试保留一份用于注入与断言，另一份交给处理器。
///
/// # 示例
///
/// ```rust
/// use cancomms_can::{CanMessage, CanTransport, MockTransport};
///
/// let transport = MockTransport::new();
/// let handle = transport.open("vcan0", &[]).unwrap();
/// transport.inject_frame(CanMessage::new_standard(0x10, &[1]));
/// assert_eq!(transport.receive_one(&handle).unwrap().id(), 0x10);
/// ```
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::with_read_timeout(Duration::from_millis(10))
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// `receive_one` 在没有入站数据时的阻塞上限
    pub fn with_read_timeout(read_timeout: Duration) -> Self {
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(MockState {
                inbound_tx,
                inbound_rx,
                sent: Mutex::new(Vec::new()),
                opened_filters: Mutex::new(Vec::new()),
                open_calls: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
                fail_open: AtomicBool::new(false),
                fail_transmit: AtomicBool::new(false),
                fail_close: AtomicBool::new(false),
                read_timeout,
            }),
        }
    }

    /// 注入一帧入站数据
    pub fn inject_frame(&self, message: CanMessage) {
        let _ = self.state.inbound_tx.send(Ok(message));
    }

    /// 注入一次读取失败（以 errno 表示）
    pub fn inject_read_error(&self, errno: i32) {
        self.inject_error(CanError::Io(std::io::Error::from_raw_os_error(errno)));
    }

    /// 让下一次 `receive_one` 返回指定错误
    pub fn inject_error(&self, err: CanError) {
        let _ = self.state.inbound_tx.send(Err(err));
    }

    /// 尚未被读取的入站条目数
    pub fn pending_inbound(&self) -> usize {
        self.state.inbound_rx.len()
    }

    /// 已发送的帧（按发送顺序）
    pub fn sent_frames(&self) -> Vec<CanMessage> {
        self.state.sent.lock().clone()
    }

    /// 每次 `open` 收到的过滤器列表
    pub fn opened_filters(&self) -> Vec<Vec<CanFilter>> {
        self.state.opened_filters.lock().clone()
    }

    pub fn open_calls(&self) -> usize {
        self.state.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_transmit(&self, fail: bool) {
        self.state.fail_transmit.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }
}

impl CanTransport for MockTransport {
    type Handle = MockHandle;

    fn open(&self, device: &str, filters: &[CanFilter]) -> Result<MockHandle, CanError> {
        self.state.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::NotFound,
                format!("mock device '{}' unavailable", device),
            )));
        }

        self.state.opened_filters.lock().push(filters.to_vec());
        trace!("Mock transport opened '{}'", device);
        Ok(MockHandle {
            device: device.to_string(),
            filters: filters.to_vec(),
            closed: AtomicBool::new(false),
        })
    }

    fn transmit(&self, handle: &MockHandle, message: &CanMessage) -> Result<(), CanError> {
        if handle.is_closed() {
            return Err(CanError::Closed);
        }
        if self.state.fail_transmit.load(Ordering::SeqCst) {
            return Err(CanError::Io(std::io::Error::from_raw_os_error(ENOBUFS)));
        }
        self.state.sent.lock().push(*message);
        Ok(())
    }

    fn receive_one(&self, handle: &MockHandle) -> Result<CanMessage, CanError> {
        let deadline = Instant::now() + self.state.read_timeout;
        loop {
            if handle.is_closed() {
                return Err(CanError::Closed);
            }

            match self.state.inbound_rx.recv_deadline(deadline) {
                Ok(Ok(message)) if handle.accepts(&message) => return Ok(message),
                Ok(Ok(message)) => trace!("Mock transport filtered out {}", message),
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => return Err(CanError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(CanError::Closed),
            }
        }
    }

    fn close(&self, device: &str, handle: &MockHandle) -> Result<(), CanError> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(CanError::Io(std::io::Error::other(format!(
                "mock close of '{}' failed",
                device
            ))));
        }
        if handle.closed.swap(true, Ordering::AcqRel) {
            return Err(CanError::Closed);
        }
        trace!("Mock transport closed '{}'", device);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_timeout_when_empty() {
        let transport = MockTransport::with_read_timeout(Duration::from_millis(1));
        let handle = transport.open("mock0", &[]).unwrap();
        assert!(matches!(
            transport.receive_one(&handle),
            Err(CanError::Timeout)
        ));
    }

    #[test]
    fn test_filters_applied() {
        let transport = MockTransport::new();
        let handle = transport
            .open("mock0", &[CanFilter::new(0x7FF, 0x200)])
            .unwrap();
        transport.inject_frame(CanMessage::new_standard(0x100, &[1]));
        transport.inject_frame(CanMessage::new_standard(0x200, &[2]));

        let message = transport.receive_one(&handle).unwrap();
        assert_eq!(message.id(), 0x200);
        assert_eq!(transport.opened_filters(), vec![vec![CanFilter::new(0x7FF, 0x200)]]);
    }

    #[test]
    fn test_injected_read_error_keeps_errno() {
        let transport = MockTransport::new();
        let handle = transport.open("mock0", &[]).unwrap();
        transport.inject_read_error(19);
        let err = transport.receive_one(&handle).unwrap_err();
        assert_eq!(err.os_error_code(), 19);
    }

    #[test]
    fn test_injected_error_returned_as_is() {
        let transport = MockTransport::new();
        let handle = transport.open("mock0", &[]).unwrap();
        transport.inject_error(CanError::Closed);
        assert!(matches!(
            transport.receive_one(&handle),
            Err(CanError::Closed)
        ));
        assert_eq!(transport.pending_inbound(), 0);
    }

    #[test]
    fn test_close_twice() {
        let transport = MockTransport::new();
        let handle = transport.open("mock0", &[]).unwrap();
        transport.close("mock0", &handle).unwrap();
        assert!(matches!(
            transport.close("mock0", &handle),
            Err(CanError::Closed)
        ));
        assert_eq!(transport.close_calls(), 2);
        assert!(matches!(
            transport.receive_one(&handle),
            Err(CanError::Closed)
        ));
    }

    #[test]
    fn test_transmit_records_and_fails_on_demand() {
        let transport = MockTransport::new();
        let handle = transport.open("mock0", &[]).unwrap();
        let message = CanMessage::new_extended(0x1234, &[1, 2]);
        transport.transmit(&handle, &message).unwrap();
        assert_eq!(transport.sent_frames(), vec![message]);

        transport.set_fail_transmit(true);
        assert!(transport.transmit(&handle, &message).is_err());
        assert_eq!(transport.sent_frames().len(), 1);
    }
}
