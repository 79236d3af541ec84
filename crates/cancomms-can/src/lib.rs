//! # CAN Comms Transport Layer
//!
//! CAN 传输层抽象：打开总线句柄、发送、阻塞接收单帧、关闭。
//!
//! 分发管线只依赖 [`CanTransport`] trait，不关心底层是 SocketCAN 还是测试替身。

use std::fmt::Debug;
use thiserror::Error;

pub use cancomms_frame::{CanFilter, CanMessage};

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use socketcan::{SocketCanHandle, SocketCanTransport};

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockHandle, MockTransport};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] CanDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Transport handle closed")]
    Closed,
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

impl CanError {
    /// 底层错误码（errno），没有时返回 -1
    ///
    /// 读取失败时作为 `ReadFault` 的错误码传给通知监听器。
    pub fn os_error_code(&self) -> i32 {
        match self {
            CanError::Io(e) => e.raw_os_error().unwrap_or(-1),
            CanError::Device(e) => e.os_code.unwrap_or(-1),
            _ => -1,
        }
    }
}

/// 设备错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanDeviceErrorKind {
    Unknown,
    /// 接口不存在
    NotFound,
    /// 接口存在但未启动（DOWN）
    InterfaceDown,
    AccessDenied,
    /// 过滤器等 socket 选项设置失败
    InvalidConfig,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CanDeviceError {
    pub kind: CanDeviceErrorKind,
    pub message: String,
    /// 原始 errno（如果有）
    pub os_code: Option<i32>,
}

impl CanDeviceError {
    pub fn new(kind: CanDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            os_code: None,
        }
    }

    /// 由系统调用错误构造，保留 errno 并按 errno 推断类别
    pub fn from_io(context: impl Into<String>, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => CanDeviceErrorKind::AccessDenied,
            std::io::ErrorKind::NotFound => CanDeviceErrorKind::NotFound,
            _ => CanDeviceErrorKind::Backend,
        };
        Self {
            kind,
            message: format!("{}: {}", context.into(), err),
            os_code: err.raw_os_error(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            CanDeviceErrorKind::NotFound | CanDeviceErrorKind::AccessDenied
        )
    }
}

impl From<String> for CanDeviceError {
    fn from(message: String) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for CanDeviceError {
    fn from(message: &str) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

/// CAN 传输层
///
/// 传输对象本身是无状态的操作集合，打开后的总线由 [`CanTransport::Handle`] 表示。
/// 句柄在接收线程与调用方线程之间共享（`&Handle`），因此所有方法都只借用。
///
/// # 契约
///
/// - `receive_one` 必须在有限时间内返回：没有帧时返回 `Err(CanError::Timeout)`，
///   这样接收线程才能观察到停止标志。
/// - `close` 之后，`receive_one` 必须尽快返回（通常为 `Err(CanError::Closed)`）。
/// - `Timeout` 以外的接收错误都被视为读取故障。
pub trait CanTransport: Send + Sync + 'static {
    /// 打开后的总线句柄
    type Handle: Send + Sync + Debug + 'static;

    /// 打开设备并一次性应用接收过滤器
    fn open(&self, device: &str, filters: &[CanFilter]) -> Result<Self::Handle, CanError>;

    /// 同步发送一帧
    fn transmit(&self, handle: &Self::Handle, message: &CanMessage) -> Result<(), CanError>;

    /// 阻塞接收一帧（有超时上限）
    fn receive_one(&self, handle: &Self::Handle) -> Result<CanMessage, CanError>;

    /// 关闭句柄
    fn close(&self, device: &str, handle: &Self::Handle) -> Result<(), CanError>;
}
