//! 错误帧分类与错误码描述

use crate::constants::*;

/// 错误帧的子类别
///
/// 一个错误帧的 ID 可能同时置位多个类别位，但每帧只报告一个类别，
/// 优先级固定为：bus-off > 控制器错误 > 协议错误 > 控制器重启。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorClass {
    /// 总线关闭
    BusOff,
    /// 控制器错误，携带 data[1]
    Controller(u8),
    /// 协议错误，携带 data[2]
    Protocol(u8),
    /// 控制器已重启
    Restarted,
    /// 无法识别的错误帧
    Unrecognized,
}

impl ErrorClass {
    /// 用于日志的简短名称
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::BusOff => "bus-off",
            ErrorClass::Controller(_) => "controller",
            ErrorClass::Protocol(_) => "protocol",
            ErrorClass::Restarted => "controller restarted",
            ErrorClass::Unrecognized => "unrecognized",
        }
    }
}

/// 控制器错误码（data[1]）的可读描述
///
/// # 示例
///
/// ```rust
/// use cancomms_frame::controller_error_message;
///
/// assert_eq!(controller_error_message(0x01), "RX Buffer overflow [0x01]");
/// assert_eq!(controller_error_message(0x03), "0x03 (Unexpected error code)");
/// ```
pub fn controller_error_message(code: u8) -> String {
    let text = match code {
        CAN_ERR_CRTL_UNSPEC => "Unspecified",
        CAN_ERR_CRTL_RX_OVERFLOW => "RX Buffer overflow",
        CAN_ERR_CRTL_TX_OVERFLOW => "TX Buffer overflow",
        CAN_ERR_CRTL_RX_WARNING => "Reached RX warning threshold",
        CAN_ERR_CRTL_TX_WARNING => "Reached TX warning threshold",
        CAN_ERR_CRTL_RX_PASSIVE => "Reached RX passive threshold",
        CAN_ERR_CRTL_TX_PASSIVE => "Reached TX passive threshold",
        CAN_ERR_CRTL_ACTIVE => "Recovered to error active state",
        _ => return unexpected_code(code),
    };
    format!("{} [0x{:02x}]", text, code)
}

/// 协议错误码（data[2]）的可读描述
pub fn protocol_error_message(code: u8) -> String {
    match code {
        CAN_ERR_PROT_ACTIVE => format!("Active error state announcement [0x{:02x}]", code),
        _ => unexpected_code(code),
    }
}

fn unexpected_code(code: u8) -> String {
    format!("0x{:02x} (Unexpected error code)", code)
}
