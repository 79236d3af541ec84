//! # CAN Comms Frame
//!
//! CAN 帧数据模型（无硬件依赖）
//!
//! ## 模块
//!
//! - `constants`: `linux/can.h` 与 `linux/can/error.h` 中的位布局常量
//! - `filter`: 内核接收过滤器
//! - `error_class`: 错误帧分类与错误码描述
//!
//! ## 位布局
//!
//! `CanMessage` 的原始 ID 与内核 `struct can_frame` 的 `can_id` 完全一致，
//! 标志位（EFF/RTR/ERR）保存在高 3 位，构造后不可修改。

pub mod constants;
pub mod error_class;
pub mod filter;

pub use constants::*;
pub use error_class::{ErrorClass, controller_error_message, protocol_error_message};
pub use filter::CanFilter;

use std::fmt;

/// 经典 CAN 帧（CAN 2.0）
///
/// # 设计目的
///
/// `CanMessage` 是传输层和分发管线之间的中间抽象：
/// - **入站**：传输层以原始 ID（含标志位）+ 数据构造（`from_raw`）
/// - **出站**：调用方通过显式标志构造（`new`、`new_standard`、`new_extended`）
/// - **分类**：所有分类方法都是原始 ID 的纯函数
///
/// # 设计特性
///
/// - **Copy trait**：零成本复制，在队列中按值传递
/// - **固定 8 字节**：避免堆分配
/// - **ID 不可变**：字段私有，标志位只在构造时写入
///
/// # 示例
///
/// ```rust
/// use cancomms_frame::CanMessage;
///
/// let message = CanMessage::new(true, false, 0x200, &[1, 2, 3, 4, 5, 6, 7, 8]);
/// assert_eq!(message.raw_id(), 0x8000_0200);
/// assert_eq!(message.id(), 0x200);
/// assert!(message.is_extended_id());
/// assert!(message.is_data_frame());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanMessage {
    /// 原始 CAN ID（含 EFF/RTR/ERR 标志位）
    raw_id: u32,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    data: [u8; CAN_MAX_DLEN],

    /// 有效数据长度 (0-8)
    len: u8,

    /// 接收时间戳（微秒），0 表示不可用
    timestamp_us: u64,
}

impl CanMessage {
    /// 由原始 ID 构造（传输层接收路径使用）
    ///
    /// `raw_id` 原样保存，包括所有标志位。
    pub fn from_raw(raw_id: u32, payload: &[u8]) -> Self {
        let mut data = [0u8; CAN_MAX_DLEN];
        let len = payload.len().min(CAN_MAX_DLEN);
        data[..len].copy_from_slice(&payload[..len]);

        Self {
            raw_id,
            data,
            len: len as u8,
            timestamp_us: 0,
        }
    }

    /// 语义构造器（发送路径使用）
    ///
    /// 将 `is_extended` / `is_remote` 转换为 EFF / RTR 标志位，与 `id` 按位或。
    pub fn new(is_extended: bool, is_remote: bool, id: u32, payload: &[u8]) -> Self {
        let mut raw_id = id;
        if is_extended {
            raw_id |= CAN_EFF_FLAG;
        }
        if is_remote {
            raw_id |= CAN_RTR_FLAG;
        }
        Self::from_raw(raw_id, payload)
    }

    /// 创建标准数据帧
    pub fn new_standard(id: u16, payload: &[u8]) -> Self {
        Self::new(false, false, id as u32, payload)
    }

    /// 创建扩展数据帧
    pub fn new_extended(id: u32, payload: &[u8]) -> Self {
        Self::new(true, false, id, payload)
    }

    /// 附加接收时间戳
    #[must_use]
    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// 去除 EFF/RTR/ERR 标志后的 ID
    pub fn id(&self) -> u32 {
        self.raw_id & CAN_ERR_MASK
    }

    /// 原始 ID（含标志位）
    pub fn raw_id(&self) -> u32 {
        self.raw_id
    }

    /// 有效数据
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// 有效数据长度
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 接收时间戳（微秒），0 表示不可用
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn is_extended_id(&self) -> bool {
        (self.raw_id & CAN_EFF_FLAG) != 0
    }

    pub fn is_standard_id(&self) -> bool {
        (self.raw_id & CAN_EFF_FLAG) == 0
    }

    pub fn is_data_frame(&self) -> bool {
        (self.raw_id & CAN_ERR_FLAG) == 0
    }

    pub fn is_error_frame(&self) -> bool {
        (self.raw_id & CAN_ERR_FLAG) != 0
    }

    /// 远程帧请求：请求目标节点发送数据，本身不携带数据
    pub fn is_remote_transmission_request(&self) -> bool {
        (self.raw_id & CAN_RTR_FLAG) != 0
    }

    pub fn is_bus_off_error(&self) -> bool {
        (self.id() & CAN_ERR_BUSOFF) != 0
    }

    pub fn is_controller_error(&self) -> bool {
        (self.id() & CAN_ERR_CRTL) != 0
    }

    pub fn is_protocol_error(&self) -> bool {
        (self.id() & CAN_ERR_PROT) != 0
    }

    pub fn is_controller_restarted(&self) -> bool {
        (self.id() & CAN_ERR_RESTARTED) != 0
    }

    /// 错误帧分类
    ///
    /// 数据帧返回 `None`；错误帧按 bus-off、控制器、协议、重启的顺序
    /// 返回第一个匹配的类别，都不匹配时返回 `ErrorClass::Unrecognized`。
    ///
    /// 控制器/协议错误携带的数据字节如果不存在（DLC 过短），按 0 处理。
    pub fn error_class(&self) -> Option<ErrorClass> {
        if self.is_data_frame() {
            return None;
        }

        let class = if self.is_bus_off_error() {
            ErrorClass::BusOff
        } else if self.is_controller_error() {
            ErrorClass::Controller(self.byte_or_zero(CONTROLLER_ERROR_BYTE))
        } else if self.is_protocol_error() {
            ErrorClass::Protocol(self.byte_or_zero(PROTOCOL_ERROR_BYTE))
        } else if self.is_controller_restarted() {
            ErrorClass::Restarted
        } else {
            ErrorClass::Unrecognized
        };
        Some(class)
    }

    fn byte_or_zero(&self, index: usize) -> u8 {
        self.payload().get(index).copied().unwrap_or(0)
    }
}

impl fmt::Display for CanMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id: 0x{:04x}, Length: {}, Data: ", self.id(), self.len)?;
        for byte in self.payload() {
            write!(f, "0x{:02x} ", byte)?;
        }

        f.write_str(if self.is_standard_id() { "[SFF" } else { "[EFF" })?;
        if self.is_remote_transmission_request() {
            f.write_str(", RTR")?;
        }
        if self.is_error_frame() {
            f.write_str(", ERR")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_example() {
        let message = CanMessage::from_raw(0x8000_0200, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(message.id(), 0x200);
        assert!(message.is_extended_id());
        assert!(!message.is_standard_id());
        assert!(message.is_data_frame());
        assert!(!message.is_error_frame());
        assert_eq!(message.error_class(), None);
    }

    #[test]
    fn test_raw_roundtrip() {
        let payload = [0xDE, 0xAD, 0xBE, 0xEF];
        let raw_id = CAN_EFF_FLAG | CAN_RTR_FLAG | 0x1ABC_DEF0;
        let message = CanMessage::from_raw(raw_id, &payload);
        assert_eq!(message.raw_id(), raw_id);
        assert_eq!(message.payload(), &payload);
        assert_eq!(message.len(), 4);
    }

    #[test]
    fn test_semantic_constructor_sets_flags() {
        let message = CanMessage::new(false, true, 0x123, &[]);
        assert_eq!(message.raw_id(), CAN_RTR_FLAG | 0x123);
        assert!(message.is_remote_transmission_request());
        assert!(message.is_standard_id());
        assert!(message.is_empty());

        let message = CanMessage::new_extended(0x1234_5678, &[9]);
        assert_eq!(message.raw_id(), CAN_EFF_FLAG | 0x1234_5678);
        assert!(!message.is_remote_transmission_request());
    }

    #[test]
    fn test_payload_truncated_to_eight_bytes() {
        let message = CanMessage::new_standard(0x10, &[0u8; 12]);
        assert_eq!(message.len(), CAN_MAX_DLEN);
    }

    #[test]
    fn test_bus_off_has_priority() {
        // bus-off 与控制器错误同时置位，只报告 bus-off
        let raw_id = CAN_ERR_FLAG | CAN_ERR_BUSOFF | CAN_ERR_CRTL;
        let message = CanMessage::from_raw(raw_id, &[0, 0x04, 0, 0, 0, 0, 0, 0]);
        assert!(message.is_bus_off_error());
        assert!(message.is_controller_error());
        assert_eq!(message.error_class(), Some(ErrorClass::BusOff));
    }

    #[test]
    fn test_controller_and_protocol_bytes() {
        let controller = CanMessage::from_raw(
            CAN_ERR_FLAG | CAN_ERR_CRTL,
            &[0, CAN_ERR_CRTL_RX_PASSIVE, 0, 0, 0, 0, 0, 0],
        );
        assert_eq!(
            controller.error_class(),
            Some(ErrorClass::Controller(CAN_ERR_CRTL_RX_PASSIVE))
        );

        let protocol = CanMessage::from_raw(
            CAN_ERR_FLAG | CAN_ERR_PROT,
            &[0, 0, CAN_ERR_PROT_ACTIVE, 0, 0, 0, 0, 0],
        );
        assert_eq!(
            protocol.error_class(),
            Some(ErrorClass::Protocol(CAN_ERR_PROT_ACTIVE))
        );

        let restarted = CanMessage::from_raw(CAN_ERR_FLAG | CAN_ERR_RESTARTED, &[0; 8]);
        assert_eq!(restarted.error_class(), Some(ErrorClass::Restarted));
    }

    #[test]
    fn test_short_error_payload_reads_zero() {
        let message = CanMessage::from_raw(CAN_ERR_FLAG | CAN_ERR_PROT, &[0xAA]);
        assert_eq!(message.error_class(), Some(ErrorClass::Protocol(0)));
    }

    #[test]
    fn test_unrecognized_error_frame() {
        // 0x01 = CAN_ERR_TX_TIMEOUT，不在分发范围内
        let message = CanMessage::from_raw(CAN_ERR_FLAG | 0x01, &[0; 8]);
        assert_eq!(message.error_class(), Some(ErrorClass::Unrecognized));
    }

    #[test]
    fn test_display() {
        let message = CanMessage::new(true, true, 0x200, &[0x01, 0xAB]);
        assert_eq!(
            message.to_string(),
            "Id: 0x0200, Length: 2, Data: 0x01 0xab [EFF, RTR]"
        );

        let error = CanMessage::from_raw(CAN_ERR_FLAG | CAN_ERR_BUSOFF, &[]);
        assert_eq!(error.to_string(), "Id: 0x0040, Length: 0, Data: [SFF, ERR]");
    }

    #[test]
    fn test_timestamp() {
        let message = CanMessage::new_standard(0x1, &[1]).with_timestamp(42);
        assert_eq!(message.timestamp_us(), 42);
        assert_eq!(CanMessage::new_standard(0x1, &[1]).timestamp_us(), 0);
    }

    #[test]
    #[cfg(feature = "serde")]
    fn test_serde_json_roundtrip() {
        let frames = vec![
            CanMessage::new_standard(0x1A1, &[0x01, 0x02, 0x03, 0x04]),
            CanMessage::from_raw(CAN_ERR_FLAG | CAN_ERR_CRTL, &[0, 0x04, 0, 0, 0, 0, 0, 0]),
            CanMessage::new_extended(0x1234_5678, &[0xFF; 8]).with_timestamp(1_000),
        ];
        let json = serde_json::to_string(&frames).unwrap();
        let decoded: Vec<CanMessage> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, frames);
    }
}
