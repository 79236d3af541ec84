//! Prelude 模块
//!
//! 常用类型的便捷导入：
//!
//! ```rust
//! use cancomms::prelude::*;
//! ```

pub use crate::{
    CanCommsHandler, CanError, CanFilter, CanMessage, CanMessageListener,
    CanNotificationListener, CanTransport, DriverError, ErrorClass, HandlerBuilder,
    ListenerResult, PipelineConfig, ReadFault,
};

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use crate::{SocketCanHandler, SocketCanTransport};
