//! 驱动层模块
//!
//! 本模块提供 CAN 通讯处理器的核心功能，包括：
//! - 接收线程与分发线程（有界队列 + 背压）
//! - 生命周期管理（start / stop / reopen）
//! - 错误帧分类与通知分发
//! - 读取故障的异步通知
//! - 监听器系统（写时复制快照）
//!
//! # 使用场景
//!
//! 大多数用户应通过 [`HandlerBuilder`] 构造处理器，
//! 测试中可以使用 `cancomms-can` 的 `mock` 传输层替代真实总线。

mod builder;
mod error;
mod handler;
pub mod listeners;
pub mod metrics;
pub mod pipeline;
pub mod queue;

pub use builder::HandlerBuilder;
pub use error::DriverError;
pub use handler::{
    CanCommsHandler, DISPATCH_THREAD_NAME, JOIN_WATCHDOG_THREAD_NAME, RECEIVER_THREAD_NAME, TaskState,
};
pub use listeners::{
    CanMessageListener, CanNotificationListener, ListenerRegistry, ListenerResult, ReadFault,
};
pub use metrics::{HandlerMetrics, MetricsSnapshot};
pub use pipeline::{FAULT_THREAD_NAME, PipelineConfig, dispatch_loop, receiver_loop};
pub use queue::{DEFAULT_QUEUE_CAPACITY, FrameQueue};
