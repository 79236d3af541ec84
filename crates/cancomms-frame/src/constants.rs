//! CAN ID 位布局与错误帧常量
//!
//! 数值与 Linux 内核头文件 `linux/can.h`、`linux/can/error.h` 保持一致，
//! 下游监听器直接依赖这些位置和掩码，不得修改。
//!
//! ```text
//! bit 0-28  : CAN 标识符（11/29 bit）
//! bit 29    : 错误帧标志（0 = 数据帧，1 = 错误帧）
//! bit 30    : 远程帧标志（1 = RTR 帧）
//! bit 31    : 帧格式标志（0 = 标准 11 bit，1 = 扩展 29 bit）
//! ```

// === can.h ===

/// 标准帧格式（SFF）掩码
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// 扩展帧格式（EFF）掩码
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
/// 去除 EFF/RTR/ERR 标志位的掩码
pub const CAN_ERR_MASK: u32 = 0x1FFF_FFFF;

/// EFF/SFF 标志（最高位）
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// 远程帧请求标志
pub const CAN_RTR_FLAG: u32 = 0x4000_0000;
/// 错误帧标志
pub const CAN_ERR_FLAG: u32 = 0x2000_0000;

/// 经典 CAN 最大数据长度
pub const CAN_MAX_DLEN: usize = 8;

// === can/error.h：错误类别（位于去除标志后的 ID 中） ===

/// 控制器问题，详细信息在 data[1]
pub const CAN_ERR_CRTL: u32 = 0x0000_0004;
/// 协议错误，详细信息在 data[2]
pub const CAN_ERR_PROT: u32 = 0x0000_0008;
/// 总线关闭（Bus-off）
pub const CAN_ERR_BUSOFF: u32 = 0x0000_0040;
/// 控制器已重启
pub const CAN_ERR_RESTARTED: u32 = 0x0000_0100;

// === data[1]：控制器错误状态 ===

pub const CAN_ERR_CRTL_UNSPEC: u8 = 0x00;
pub const CAN_ERR_CRTL_RX_OVERFLOW: u8 = 0x01;
pub const CAN_ERR_CRTL_TX_OVERFLOW: u8 = 0x02;
pub const CAN_ERR_CRTL_RX_WARNING: u8 = 0x04;
pub const CAN_ERR_CRTL_TX_WARNING: u8 = 0x08;
/// 至少一个错误计数器超过协议规定的 127
pub const CAN_ERR_CRTL_RX_PASSIVE: u8 = 0x10;
pub const CAN_ERR_CRTL_TX_PASSIVE: u8 = 0x20;
/// 恢复到 error-active 状态
pub const CAN_ERR_CRTL_ACTIVE: u8 = 0x40;

// === data[2]：协议错误类型 ===

/// error-active 状态通告
pub const CAN_ERR_PROT_ACTIVE: u8 = 0x40;

/// 控制器错误所在的数据字节索引
pub const CONTROLLER_ERROR_BYTE: usize = 1;
/// 协议错误所在的数据字节索引
pub const PROTOCOL_ERROR_BYTE: usize = 2;
