//! CAN 接口状态检查
//!
//! 使用 ioctl 检查 Linux 网络接口是否存在且已启动（UP 状态）。
//! 只读操作，不需要特殊权限。

use crate::{CanDeviceError, CanDeviceErrorKind, CanError};
use libc::{AF_INET, IFF_UP, SIOCGIFFLAGS, SOCK_DGRAM, if_nametoindex, ifreq};
use std::ffi::CString;
use std::io;
use tracing::trace;

/// ifr_name 为 IFNAMSIZ = 16 字节，包括结尾的 NUL
const MAX_IFACE_NAME_LEN: usize = 15;

/// 检查 CAN 接口是否存在且已启动
///
/// # 返回值
/// - `Ok(true)`: 接口存在且 IFF_UP 置位
/// - `Ok(false)`: 接口存在但处于 DOWN 状态
/// - `Err(CanError::Device)`: 接口不存在或接口名无效
/// - `Err(CanError::Io)`: socket/ioctl 调用失败
pub fn check_interface_status(interface: &str) -> Result<bool, CanError> {
    if interface.is_empty() || interface.len() > MAX_IFACE_NAME_LEN {
        return Err(CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::InvalidConfig,
            format!(
                "Interface name '{}' must be 1-{} characters",
                interface, MAX_IFACE_NAME_LEN
            ),
        )));
    }

    let c_iface = CString::new(interface).map_err(|e| {
        CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::InvalidConfig,
            format!("Invalid interface name: {}", e),
        ))
    })?;

    let ifindex = unsafe { if_nametoindex(c_iface.as_ptr()) };
    if ifindex == 0 {
        let errno = io::Error::last_os_error();
        return Err(CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::NotFound,
            format!(
                "CAN interface '{}' does not exist ({}). Please create it first:\n  sudo ip link add dev {} type can",
                interface, errno, interface
            ),
        )));
    }

    let mut ifr: ifreq = unsafe { std::mem::zeroed() };
    let name_bytes = interface.as_bytes();
    unsafe {
        std::ptr::copy_nonoverlapping(
            name_bytes.as_ptr(),
            ifr.ifr_name.as_mut_ptr() as *mut u8,
            name_bytes.len(),
        );
    }
    ifr.ifr_name[name_bytes.len()] = 0;

    // RAII 关闭 ioctl 用的 socket
    struct FdGuard(libc::c_int);
    impl Drop for FdGuard {
        fn drop(&mut self) {
            if self.0 >= 0 {
                unsafe { libc::close(self.0) };
            }
        }
    }

    let sockfd = unsafe { libc::socket(AF_INET, SOCK_DGRAM, 0) };
    if sockfd < 0 {
        return Err(CanError::Io(io::Error::last_os_error()));
    }
    let _guard = FdGuard(sockfd);

    let result = unsafe {
        libc::ioctl(
            sockfd,
            SIOCGIFFLAGS,
            &mut ifr as *mut _ as *mut libc::c_void,
        )
    };
    if result < 0 {
        return Err(CanError::Io(io::Error::last_os_error()));
    }

    // ifru_flags 是 ifr_ifru union 的第一个字段（c_short）
    let flags = unsafe { *(std::ptr::addr_of!(ifr.ifr_ifru) as *const libc::c_short) };
    let is_up = (flags as i32 & IFF_UP) != 0;

    trace!(
        "Interface '{}' status: {}",
        interface,
        if is_up { "UP" } else { "DOWN" }
    );
    Ok(is_up)
}
