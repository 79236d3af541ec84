//! 驱动层错误类型定义

use cancomms_can::CanError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// CAN 传输层错误
    #[error("CAN transport error: {0}")]
    Can(#[from] CanError),

    /// 接收或分发线程仍在运行
    #[error("Handler already running (stop it first)")]
    AlreadyRunning,

    /// 只能在停止状态下执行的操作
    #[error("Handler must be stopped for this operation")]
    NotStopped,

    /// 线程创建失败
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),
}
