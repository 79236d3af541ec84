//! Builder 模式实现
//!
//! 提供链式构造 [`CanCommsHandler`] 的便捷方式。

use crate::error::DriverError;
use crate::handler::CanCommsHandler;
use crate::pipeline::PipelineConfig;
use cancomms_can::{CanDeviceError, CanDeviceErrorKind, CanError, CanFilter, CanTransport};
#[cfg(all(target_os = "linux", feature = "socketcan"))]
use cancomms_can::SocketCanTransport;
#[cfg(all(target_os = "linux", feature = "socketcan"))]
use std::time::Duration;

/// Handler Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use cancomms_driver::{HandlerBuilder, PipelineConfig};
/// use cancomms_can::CanFilter;
///
/// let handler = HandlerBuilder::new()
///     .device("can0")
///     .filter(CanFilter::new(0x7FF, 0x200))
///     .pipeline_config(PipelineConfig {
///         queue_capacity: 4096,
///         ..PipelineConfig::default()
///     })
///     .build()
///     .unwrap();
/// handler.start().unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct HandlerBuilder {
    /// CAN 接口名称（如 "can0"、"vcan0"）
    device: Option<String>,
    /// 接收过滤器，空列表表示接收全部
    filters: Vec<CanFilter>,
    pipeline_config: Option<PipelineConfig>,
}

impl HandlerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置设备名称（必填）
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// 追加一个过滤器
    pub fn filter(mut self, filter: CanFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// 追加多个过滤器
    pub fn filters(mut self, filters: impl IntoIterator<Item = CanFilter>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// 设置 Pipeline 配置（可选）
    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = Some(config);
        self
    }

    /// 使用给定的传输层构建（打开设备，不启动线程）
    ///
    /// # 错误
    /// - `DriverError::Can(CanError::Device)`: 未设置设备名，或打开失败
    pub fn build_with<T: CanTransport>(self, transport: T) -> Result<CanCommsHandler<T>, DriverError> {
        let device = self.device.ok_or_else(|| {
            CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::InvalidConfig,
                "No CAN device specified, call .device(\"can0\") first",
            ))
        })?;
        CanCommsHandler::open(
            transport,
            device,
            &self.filters,
            self.pipeline_config.unwrap_or_default(),
        )
    }

    /// 使用 SocketCAN 传输层构建
    ///
    /// 传输层的读超时取自 `PipelineConfig::receive_timeout_ms`。
    #[cfg(all(target_os = "linux", feature = "socketcan"))]
    pub fn build(self) -> Result<CanCommsHandler<SocketCanTransport>, DriverError> {
        let receive_timeout = Duration::from_millis(
            self.pipeline_config
                .as_ref()
                .map(|c| c.receive_timeout_ms)
                .unwrap_or_else(|| PipelineConfig::default().receive_timeout_ms),
        );
        let transport = SocketCanTransport::new().with_read_timeout(receive_timeout);
        self.build_with(transport)
    }
}
