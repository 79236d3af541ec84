//! SocketCAN 传输层实现
//!
//! 基于 Linux 内核 SocketCAN 的 [`CanTransport`] 实现。
//!
//! ## 特性
//!
//! - 打开时检查接口状态，DOWN 或不存在时返回可操作的错误信息
//! - 内核级接收过滤器（`CAN_RAW_FILTER`）
//! - 错误帧订阅（`CAN_RAW_ERR_FILTER`），错误帧与数据帧走同一接收路径
//! - 接收时间戳（硬件优先，软件降级）
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**
//! - 波特率等由 `ip link` 配置，不在应用层设置

use crate::{CanDeviceError, CanDeviceErrorKind, CanError, CanTransport};
use arc_swap::ArcSwapOption;
use cancomms_frame::{
    CAN_ERR_BUSOFF, CAN_ERR_CRTL, CAN_ERR_PROT, CAN_ERR_RESTARTED, CAN_MAX_DLEN, CanFilter,
    CanMessage,
};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::{ControlMessageOwned, MsgFlags, RecvMsg, SockaddrStorage, recvmsg};
use socketcan::{CanSocket, Socket, SocketOptions};
use std::io::{self, IoSliceMut};
use std::mem;
use std::os::fd::BorrowedFd;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

mod interface_check;

pub use interface_check::check_interface_status;

/// 默认读超时，与分发线程的轮询周期一致
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// 默认订阅的错误类别：bus-off、控制器、协议、重启
pub const DEFAULT_ERROR_MASK: u32 = CAN_ERR_BUSOFF | CAN_ERR_CRTL | CAN_ERR_PROT | CAN_ERR_RESTARTED;

/// 发送遇到 EINTR/EAGAIN 时的最大重试次数
const TRANSMIT_RETRY_LIMIT: usize = 16;

const CAN_FRAME_LEN: usize = mem::size_of::<libc::can_frame>();

/// SocketCAN 传输层
///
/// 本身不持有 socket，所有状态都在 [`SocketCanHandle`] 中。
///
/// # 示例
///
/// ```no_run
/// use cancomms_can::{CanFilter, CanMessage, CanTransport, SocketCanTransport};
///
/// let transport = SocketCanTransport::new();
/// let handle = transport.open("can0", &[CanFilter::accept_all()]).unwrap();
/// transport
///     .transmit(&handle, &CanMessage::new_standard(0x123, &[1, 2, 3]))
///     .unwrap();
/// transport.close("can0", &handle).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct SocketCanTransport {
    read_timeout: Duration,
    error_mask: u32,
}

impl Default for SocketCanTransport {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            error_mask: DEFAULT_ERROR_MASK,
        }
    }
}

impl SocketCanTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置 `receive_one` 的单次阻塞上限
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// 设置订阅的错误类别位（`CAN_ERR_*`），0 表示不接收错误帧
    #[must_use]
    pub fn with_error_mask(mut self, mask: u32) -> Self {
        self.error_mask = mask;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn error_mask(&self) -> u32 {
        self.error_mask
    }

    fn set_error_filter(&self, socket: &CanSocket, interface: &str) -> Result<(), CanError> {
        let mask: libc::can_err_mask_t = self.error_mask;
        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_CAN_RAW,
                libc::CAN_RAW_ERR_FILTER,
                &mask as *const _ as *const libc::c_void,
                mem::size_of::<libc::can_err_mask_t>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            return Err(CanError::Device(CanDeviceError::from_io(
                format!("Failed to set error filter on '{}'", interface),
                &err,
            )));
        }
        trace!(
            "SocketCAN '{}' error mask set to 0x{:X}",
            interface, self.error_mask
        );
        Ok(())
    }
}

/// 已打开的 SocketCAN 句柄
///
/// socket 放在 `ArcSwapOption` 中：`close` 把它换成 `None`，
/// 正在 `poll` 中的接收线程持有的那份引用在本轮超时后释放，fd 随之关闭。
#[derive(Debug)]
pub struct SocketCanHandle {
    interface: String,
    socket: ArcSwapOption<CanSocket>,
    timestamping_enabled: bool,
    hw_timestamp_available: AtomicBool,
}

impl SocketCanHandle {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn is_closed(&self) -> bool {
        self.socket.load().is_none()
    }

    pub fn timestamping_enabled(&self) -> bool {
        self.timestamping_enabled
    }

    pub fn hw_timestamp_available(&self) -> bool {
        self.hw_timestamp_available.load(Ordering::Relaxed)
    }

    fn socket(&self) -> Result<Arc<CanSocket>, CanError> {
        self.socket.load_full().ok_or(CanError::Closed)
    }

    /// 从 CMSG 中提取时间戳（微秒）
    ///
    /// 优先级：`hw_trans`（硬件时间同步到系统时钟）> `system`（软件）> 0
    fn extract_timestamp(&self, msg: &RecvMsg<'_, '_, SockaddrStorage>) -> u64 {
        if !self.timestamping_enabled {
            return 0;
        }

        let cmsgs = match msg.cmsgs() {
            Ok(cmsgs) => cmsgs,
            Err(e) => {
                warn!("Failed to parse CMSG: {}, returning timestamp 0", e);
                return 0;
            },
        };

        for cmsg in cmsgs {
            if let ControlMessageOwned::ScmTimestampsns(timestamps) = cmsg {
                let hw = timestamps.hw_trans;
                if hw.tv_sec() != 0 || hw.tv_nsec() != 0 {
                    if !self.hw_timestamp_available.swap(true, Ordering::Relaxed) {
                        trace!("Hardware timestamp detected on '{}'", self.interface);
                    }
                    return timespec_to_micros(hw.tv_sec(), hw.tv_nsec());
                }

                let sw = timestamps.system;
                if sw.tv_sec() != 0 || sw.tv_nsec() != 0 {
                    return timespec_to_micros(sw.tv_sec(), sw.tv_nsec());
                }
            }
        }
        0
    }
}

fn timespec_to_micros(tv_sec: i64, tv_nsec: i64) -> u64 {
    (tv_sec as u64) * 1_000_000 + ((tv_nsec as u64) / 1000)
}

/// 解析 `recvmsg` 读到的 `struct can_frame`
fn parse_raw_can_frame(data: &[u8]) -> Result<CanMessage, CanError> {
    if data.len() < CAN_FRAME_LEN {
        return Err(CanError::InvalidFrame(format!(
            "Incomplete CAN frame: {} bytes (expected {})",
            data.len(),
            CAN_FRAME_LEN
        )));
    }

    // 拷贝到已对齐的结构体，避免未对齐指针强转
    let mut raw_frame: libc::can_frame = unsafe { mem::zeroed() };
    unsafe {
        std::ptr::copy_nonoverlapping(
            data.as_ptr(),
            &mut raw_frame as *mut _ as *mut u8,
            CAN_FRAME_LEN,
        );
    }

    let dlc = raw_frame.can_dlc as usize;
    if dlc > CAN_MAX_DLEN {
        return Err(CanError::InvalidFrame(format!(
            "Invalid DLC: {} (max {})",
            dlc, CAN_MAX_DLEN
        )));
    }

    Ok(CanMessage::from_raw(raw_frame.can_id, &raw_frame.data[..dlc]))
}

impl CanTransport for SocketCanTransport {
    type Handle = SocketCanHandle;

    /// 打开接口
    ///
    /// # 错误
    /// - `CanDeviceErrorKind::NotFound`: 接口不存在
    /// - `CanDeviceErrorKind::InterfaceDown`: 接口存在但未启动
    /// - `CanDeviceErrorKind::InvalidConfig`: 过滤器设置失败
    fn open(&self, device: &str, filters: &[CanFilter]) -> Result<SocketCanHandle, CanError> {
        if !check_interface_status(device)? {
            return Err(CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::InterfaceDown,
                format!(
                    "CAN interface '{}' exists but is not UP. Please start it first:\n  sudo ip link set up {}",
                    device, device
                ),
            )));
        }

        let socket = CanSocket::open(device).map_err(|e| {
            CanError::Device(CanDeviceError::from_io(
                format!("Failed to open CAN interface '{}'", device),
                &e,
            ))
        })?;

        self.set_error_filter(&socket, device)?;

        // 空列表保持内核默认（接收全部）
        if !filters.is_empty() {
            let kernel_filters: Vec<socketcan::CanFilter> = filters
                .iter()
                .map(|f| socketcan::CanFilter::new(f.pattern(), f.mask()))
                .collect();
            socket.set_filters(kernel_filters.as_slice()).map_err(|e| {
                let mut err = CanDeviceError::from_io(
                    format!("Failed to apply {} filter(s) on '{}'", filters.len(), device),
                    &e,
                );
                err.kind = CanDeviceErrorKind::InvalidConfig;
                CanError::Device(err)
            })?;
        }

        let flags = libc::SOF_TIMESTAMPING_RX_HARDWARE
            | libc::SOF_TIMESTAMPING_RAW_HARDWARE
            | libc::SOF_TIMESTAMPING_RX_SOFTWARE
            | libc::SOF_TIMESTAMPING_SOFTWARE;
        let timestamping_enabled = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_TIMESTAMPING,
                &flags as *const _ as *const libc::c_void,
                mem::size_of::<u32>() as libc::socklen_t,
            )
        } >= 0;
        if !timestamping_enabled {
            warn!(
                "Failed to enable SO_TIMESTAMPING on '{}': {}",
                device,
                io::Error::last_os_error()
            );
        }

        debug!(
            "SocketCAN interface '{}' opened ({} filter(s), timestamping {})",
            device,
            filters.len(),
            if timestamping_enabled { "on" } else { "off" }
        );

        Ok(SocketCanHandle {
            interface: device.to_string(),
            socket: ArcSwapOption::from_pointee(socket),
            timestamping_enabled,
            hw_timestamp_available: AtomicBool::new(false),
        })
    }

    fn transmit(&self, handle: &SocketCanHandle, message: &CanMessage) -> Result<(), CanError> {
        let socket = handle.socket()?;

        let mut raw_frame: libc::can_frame = unsafe { mem::zeroed() };
        raw_frame.can_id = message.raw_id();
        raw_frame.can_dlc = message.len() as u8;
        raw_frame.data[..message.len()].copy_from_slice(message.payload());

        for _ in 0..TRANSMIT_RETRY_LIMIT {
            let written = unsafe {
                libc::write(
                    socket.as_raw_fd(),
                    &raw_frame as *const _ as *const libc::c_void,
                    CAN_FRAME_LEN,
                )
            };
            if written == CAN_FRAME_LEN as isize {
                trace!("Sent CAN frame on '{}': {}", handle.interface, message);
                return Ok(());
            }
            if written >= 0 {
                return Err(CanError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("Short write: {} of {} bytes", written, CAN_FRAME_LEN),
                )));
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => continue,
                _ => return Err(CanError::Io(err)),
            }
        }

        Err(CanError::Timeout)
    }

    /// 接收一帧（poll + recvmsg）
    ///
    /// # 返回值
    /// - `Err(CanError::Timeout)`: `read_timeout` 内没有帧
    /// - `Err(CanError::Closed)`: 句柄已关闭
    /// - `Err(CanError::Io)`: 系统调用失败，保留 errno
    fn receive_one(&self, handle: &SocketCanHandle) -> Result<CanMessage, CanError> {
        let socket = handle.socket()?;
        let fd = socket.as_raw_fd();

        let pollfd = PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN);
        let timeout_ms = self.read_timeout.as_millis().min(u16::MAX as u128) as u16;
        match poll(&mut [pollfd], PollTimeout::from(timeout_ms)) {
            Ok(0) | Err(nix::errno::Errno::EINTR) => return Err(CanError::Timeout),
            Ok(_) => {},
            Err(errno) => return Err(CanError::Io(io::Error::from(errno))),
        }

        let mut frame_buf = [0u8; CAN_FRAME_LEN];
        let mut cmsg_buf = [0u8; 1024];
        let mut iov = [IoSliceMut::new(&mut frame_buf)];

        let (bytes, timestamp_us) = match recvmsg::<SockaddrStorage>(
            fd,
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::empty(),
        ) {
            Ok(msg) => (msg.bytes, handle.extract_timestamp(&msg)),
            // EWOULDBLOCK 与 EAGAIN 在 Linux 上相同
            Err(nix::errno::Errno::EAGAIN) | Err(nix::errno::Errno::EINTR) => {
                return Err(CanError::Timeout);
            },
            Err(errno) => return Err(CanError::Io(io::Error::from(errno))),
        };

        let message = parse_raw_can_frame(&frame_buf[..bytes])?;
        Ok(message.with_timestamp(timestamp_us))
    }

    /// 关闭句柄
    ///
    /// 重复关闭返回 `Err(CanError::Closed)`。
    fn close(&self, device: &str, handle: &SocketCanHandle) -> Result<(), CanError> {
        match handle.socket.swap(None) {
            Some(_) => {
                debug!("SocketCAN interface '{}' closed", device);
                Ok(())
            },
            None => Err(CanError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cancomms_frame::CAN_EFF_FLAG;
    use std::process::Command;

    fn can_interface_exists(interface: &str) -> bool {
        Command::new("ip")
            .args(["link", "show", interface])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// 宏：要求 vcan0 接口存在，如果不存在则跳过测试
    macro_rules! require_vcan0 {
        () => {{
            if !can_interface_exists("vcan0") {
                eprintln!("Skipping test: vcan0 interface not available");
                return;
            }
            "vcan0"
        }};
    }

    fn raw_frame_bytes(can_id: u32, dlc: u8, data: &[u8]) -> [u8; CAN_FRAME_LEN] {
        let mut raw_frame: libc::can_frame = unsafe { mem::zeroed() };
        raw_frame.can_id = can_id;
        raw_frame.can_dlc = dlc;
        raw_frame.data[..data.len()].copy_from_slice(data);

        let mut bytes = [0u8; CAN_FRAME_LEN];
        unsafe {
            std::ptr::copy_nonoverlapping(
                &raw_frame as *const _ as *const u8,
                bytes.as_mut_ptr(),
                CAN_FRAME_LEN,
            );
        }
        bytes
    }

    #[test]
    fn test_defaults() {
        let transport = SocketCanTransport::new();
        assert_eq!(transport.read_timeout(), Duration::from_millis(100));
        assert_eq!(transport.error_mask(), 0x04 | 0x08 | 0x40 | 0x100);

        let transport = transport
            .with_read_timeout(Duration::from_millis(5))
            .with_error_mask(CAN_ERR_BUSOFF);
        assert_eq!(transport.read_timeout(), Duration::from_millis(5));
        assert_eq!(transport.error_mask(), CAN_ERR_BUSOFF);
    }

    #[test]
    fn test_timespec_to_micros() {
        assert_eq!(timespec_to_micros(0, 0), 0);
        assert_eq!(timespec_to_micros(1, 500_000), 1_000_500);
        assert_eq!(timespec_to_micros(2, 999), 2_000_000);
    }

    #[test]
    fn test_parse_raw_can_frame() {
        let bytes = raw_frame_bytes(CAN_EFF_FLAG | 0x200, 3, &[1, 2, 3]);
        let message = parse_raw_can_frame(&bytes).unwrap();
        assert_eq!(message.raw_id(), CAN_EFF_FLAG | 0x200);
        assert_eq!(message.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_parse_rejects_bad_dlc_and_short_buffer() {
        let bytes = raw_frame_bytes(0x10, 9, &[]);
        assert!(matches!(
            parse_raw_can_frame(&bytes),
            Err(CanError::InvalidFrame(_))
        ));
        assert!(matches!(
            parse_raw_can_frame(&bytes[..4]),
            Err(CanError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_open_nonexistent_interface() {
        let result = SocketCanTransport::new().open("nonexistent_c9", &[]);
        match result {
            Err(CanError::Device(e)) => assert_eq!(e.kind, CanDeviceErrorKind::NotFound),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_open_and_close_twice() {
        let interface = require_vcan0!();
        let transport = SocketCanTransport::new();
        let handle = transport.open(interface, &[CanFilter::accept_all()]).unwrap();
        assert!(!handle.is_closed());
        assert_eq!(handle.interface(), interface);

        transport.close(interface, &handle).unwrap();
        assert!(handle.is_closed());
        assert!(matches!(
            transport.close(interface, &handle),
            Err(CanError::Closed)
        ));
        assert!(matches!(
            transport.receive_one(&handle),
            Err(CanError::Closed)
        ));
        assert!(matches!(
            transport.transmit(&handle, &CanMessage::new_standard(0x1, &[])),
            Err(CanError::Closed)
        ));
    }

    #[test]
    fn test_receive_timeout() {
        let interface = require_vcan0!();
        let transport = SocketCanTransport::new().with_read_timeout(Duration::from_millis(10));
        // 只接收一个不会出现的 ID
        let handle = transport
            .open(interface, &[CanFilter::new(0x7FF, 0x7EE)])
            .unwrap();
        assert!(matches!(
            transport.receive_one(&handle),
            Err(CanError::Timeout)
        ));
    }

    #[test]
    fn test_transmit_receive_between_sockets() {
        let interface = require_vcan0!();
        let transport = SocketCanTransport::new().with_read_timeout(Duration::from_millis(500));
        let rx = transport.open(interface, &[CanFilter::new(0x7FF, 0x321)]).unwrap();
        let tx = transport.open(interface, &[]).unwrap();

        let sent = CanMessage::new_standard(0x321, &[0xAA, 0xBB]);
        transport.transmit(&tx, &sent).unwrap();

        let received = transport.receive_one(&rx).unwrap();
        assert_eq!(received.raw_id(), sent.raw_id());
        assert_eq!(received.payload(), sent.payload());
        if rx.timestamping_enabled() {
            assert!(received.timestamp_us() > 0);
        }
    }
}
