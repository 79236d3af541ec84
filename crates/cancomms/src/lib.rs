//! CAN Comms - 多线程 CAN 总线通信处理器
//!
//! 在 Linux SocketCAN 之上提供「接收线程 + 有界队列 + 分发线程」的收发管线，
//! 把收到的数据帧和错误帧事件分发给注册的监听器。
//!
//! # 架构设计
//!
//! 本 crate 采用分层架构，从底层到高层：
//!
//! - **帧层** (`frame`): CAN 帧数据模型、过滤器、错误帧分类（无硬件依赖）
//! - **传输层** (`can`): 传输抽象 `CanTransport`，SocketCAN 与 Mock 两种后端
//! - **驱动层** (`driver`): 接收/分发线程、监听器注册表、生命周期管理
//!
//! # 快速开始
//!
//! ```no_run
//! use cancomms::prelude::*;
//! use std::sync::Arc;
//!
//! struct Print;
//!
//! impl CanMessageListener for Print {
//!     fn on_message(&self, message: &CanMessage) -> ListenerResult {
//!         println!("{message}");
//!         Ok(())
//!     }
//! }
//!
//! let handler = HandlerBuilder::new()
//!     .device("can0")
//!     .filter(CanFilter::new(0x7FF, 0x123))
//!     .build()
//!     .unwrap();
//! handler.add_message_listener(Arc::new(Print));
//! handler.start().unwrap();
//! // ...
//! handler.stop().unwrap();
//! ```

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// 帧层：数据模型与错误帧分类
pub mod frame {
    pub use cancomms_frame::*;
}

/// 传输层：`CanTransport` 及其后端
pub mod can {
    pub use cancomms_can::*;
}

/// 驱动层：收发管线与生命周期
pub mod driver {
    pub use cancomms_driver::*;
}

pub mod prelude;

// --- 用户以此为界 ---
// 以下是通过 Facade Pattern 提供的公共 API

pub use cancomms_can::{CanDeviceError, CanDeviceErrorKind, CanError, CanTransport};
pub use cancomms_frame::{CanFilter, CanMessage, ErrorClass};

pub use cancomms_driver::{
    CanCommsHandler, CanMessageListener, CanNotificationListener, DriverError, HandlerBuilder,
    ListenerResult, PipelineConfig, ReadFault,
};

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use cancomms_can::SocketCanTransport;

/// SocketCAN 后端的处理器类型别名
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub type SocketCanHandler = CanCommsHandler<SocketCanTransport>;

/// 日志初始化错误
#[derive(Error, Debug)]
pub enum LoggerError {
    /// 全局 subscriber 已被设置
    #[error("Global tracing subscriber already set: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
    /// `log` 门面已被其他 logger 占用
    #[error("log facade already initialized: {0}")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),
}

/// 初始化日志输出
///
/// 安装 `tracing_subscriber::fmt` 到全局，过滤规则取自 `RUST_LOG`，
/// 未设置时为 `default_directive`（如 `"info"`、`"cancomms_driver=debug"`）。
/// 同时把 `log` crate 的记录桥接到 tracing。
///
/// 进程内只能成功调用一次，重复调用返回 [`LoggerError`]。
pub fn init_logger(default_directive: &str) -> Result<(), LoggerError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_only_once() {
        assert!(init_logger("debug").is_ok());
        assert!(matches!(
            init_logger("debug"),
            Err(LoggerError::Subscriber(_))
        ));
        tracing::info!("logger installed");
    }

    #[test]
    fn test_facade_paths() {
        let message = frame::CanMessage::new_standard(0x123, &[1, 2]);
        let same: CanMessage = message;
        assert_eq!(same.id(), 0x123);
        assert_eq!(driver::DEFAULT_QUEUE_CAPACITY, 1024);
        let _: can::CanError = CanError::Closed;
    }
}
