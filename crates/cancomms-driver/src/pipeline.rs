//! Pipeline 线程循环模块
//!
//! - `receiver_loop`: 从传输层阻塞接收，入队（队列满时背压）
//! - `dispatch_loop`: 从队列轮询，分类后分发给监听器
//! - 故障路径：读取失败时清除两个运行标志，并在独立线程中通知监听器

use crate::listeners::{
    CanMessageListener, CanNotificationListener, ListenerRegistry, ListenerResult, ReadFault,
    call_isolated,
};
use crate::metrics::HandlerMetrics;
use crate::queue::{DEFAULT_QUEUE_CAPACITY, FrameQueue};
use cancomms_can::{CanError, CanMessage, CanTransport};
use cancomms_frame::{ErrorClass, controller_error_message, protocol_error_message};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 故障通知线程名称
pub const FAULT_THREAD_NAME: &str = "cancomms-fault";

/// Pipeline 配置
///
/// # Example
///
/// ```
/// use cancomms_driver::PipelineConfig;
///
/// let config = PipelineConfig {
///     queue_capacity: 256,
///     ..PipelineConfig::default()
/// };
/// assert_eq!(config.poll_timeout_ms, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// 接收线程与分发线程之间的队列容量
    pub queue_capacity: usize,
    /// 分发线程轮询队列的超时（毫秒），决定停止信号的响应延迟
    pub poll_timeout_ms: u64,
    /// 传输层单次接收的阻塞上限（毫秒），由 Builder 交给 SocketCAN 传输层
    pub receive_timeout_ms: u64,
    /// Drop 时等待线程退出的上限（毫秒）
    pub join_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_timeout_ms: 100,
            receive_timeout_ms: 100,
            join_timeout_ms: 2000,
        }
    }
}

impl PipelineConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// 两个相互独立的运行标志
///
/// 只有生命周期方法和线程自身会修改它们。
#[derive(Debug, Clone, Default)]
pub struct RunFlags {
    pub receiver: Arc<AtomicBool>,
    pub dispatcher: Arc<AtomicBool>,
}

impl RunFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同时清除两个标志
    pub fn clear_all(&self) {
        // Release: 之前的写入对看到 false 的线程可见
        self.receiver.store(false, Ordering::Release);
        self.dispatcher.store(false, Ordering::Release);
    }

    pub fn receiver_running(&self) -> bool {
        self.receiver.load(Ordering::Acquire)
    }

    pub fn dispatcher_running(&self) -> bool {
        self.dispatcher.load(Ordering::Acquire)
    }
}

/// 接收线程的全部输入
pub struct ReceiverContext<T: CanTransport> {
    pub transport: Arc<T>,
    pub handle: Arc<T::Handle>,
    pub device: String,
    pub queue: FrameQueue,
    pub flags: RunFlags,
    pub notification_listeners: Arc<ListenerRegistry<dyn CanNotificationListener>>,
    pub metrics: Arc<HandlerMetrics>,
    /// 队列满时单次等待的时长，之后重新检查运行标志
    pub backpressure_wait: Duration,
}

/// 接收线程主循环
///
/// 运行标志为 true 时循环：
/// - `Ok(frame)`: 入队（队列满时等待，不丢帧）
/// - `Err(Timeout)`: 继续下一轮（借此观察停止信号）
/// - 其他错误：进入故障路径后退出
pub fn receiver_loop<T: CanTransport>(ctx: ReceiverContext<T>) {
    info!("Receiver thread started on '{}'", ctx.device);

    loop {
        // Acquire: 看到 false 时，也能看到停止方在此之前的写入
        if !ctx.flags.receiver_running() {
            trace!("Receiver thread: run flag cleared, exiting");
            break;
        }

        let message = match ctx.transport.receive_one(&ctx.handle) {
            Ok(message) => {
                ctx.metrics.rx_frames_total.fetch_add(1, Ordering::Relaxed);
                message
            },
            Err(CanError::Timeout) => {
                ctx.metrics.rx_timeouts.fetch_add(1, Ordering::Relaxed);
                continue;
            },
            Err(e) => {
                if !ctx.flags.receiver_running() {
                    // 停止过程中句柄被关闭，不是故障
                    debug!("Receiver thread: receive ended during stop: {}", e);
                    break;
                }
                handle_read_fault(
                    &ctx.device,
                    e,
                    &ctx.flags,
                    &ctx.notification_listeners,
                    &ctx.metrics,
                );
                return;
            },
        };

        trace!("RX {}", message);
        if !enqueue_with_backpressure(&ctx, message) {
            break;
        }
    }

    info!("Receiver thread on '{}' stopped", ctx.device);
}

/// 入队；队列满时分段等待以便观察停止信号
///
/// 返回 false 表示等待期间收到停止信号。
fn enqueue_with_backpressure<T: CanTransport>(ctx: &ReceiverContext<T>, message: CanMessage) -> bool {
    let mut pending = match ctx.queue.push_timeout(message, Duration::ZERO) {
        Ok(()) => return true,
        Err(returned) => returned,
    };

    ctx.metrics.queue_full_waits.fetch_add(1, Ordering::Relaxed);
    warn!(
        "Frame queue full ({} frames), receiver waiting for dispatcher",
        ctx.queue.capacity()
    );

    loop {
        match ctx.queue.push_timeout(pending, ctx.backpressure_wait) {
            Ok(()) => return true,
            Err(returned) => {
                if !ctx.flags.receiver_running() {
                    warn!("Receiver stopped while queue full, discarding {}", returned);
                    return false;
                }
                pending = returned;
            },
        }
    }
}

/// 故障路径
///
/// 在接收线程的失败分支中执行，不做任何阻塞操作：
/// 1. 记录错误并清除两个运行标志
/// 2. 启动独立线程通知所有通知监听器
fn handle_read_fault(
    device: &str,
    err: CanError,
    flags: &RunFlags,
    listeners: &Arc<ListenerRegistry<dyn CanNotificationListener>>,
    metrics: &Arc<HandlerMetrics>,
) {
    let fault = ReadFault {
        device: device.to_string(),
        error_code: err.os_error_code(),
        message: err.to_string(),
    };
    error!("Receiver thread: {}, stopping pipeline", fault);
    metrics.read_faults.fetch_add(1, Ordering::Relaxed);

    flags.clear_all();

    spawn_fault_notifier(fault, listeners.clone(), metrics.clone());
}

/// 在独立线程中调用 `notify_native_read_error`（不 join）
pub fn spawn_fault_notifier(
    fault: ReadFault,
    listeners: Arc<ListenerRegistry<dyn CanNotificationListener>>,
    metrics: Arc<HandlerMetrics>,
) {
    let spawned = thread::Builder::new()
        .name(FAULT_THREAD_NAME.to_string())
        .spawn(move || {
            for listener in listeners.snapshot().iter() {
                if !call_isolated("notify_native_read_error", || {
                    listener.notify_native_read_error(&fault)
                }) {
                    metrics.listener_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

    if let Err(e) = spawned {
        error!("Failed to spawn fault notifier thread: {}", e);
    }
}

/// 分发线程主循环
pub fn dispatch_loop(
    queue: FrameQueue,
    is_running: Arc<AtomicBool>,
    message_listeners: Arc<ListenerRegistry<dyn CanMessageListener>>,
    notification_listeners: Arc<ListenerRegistry<dyn CanNotificationListener>>,
    metrics: Arc<HandlerMetrics>,
    poll_timeout: Duration,
) {
    info!("Dispatch thread started");

    while is_running.load(Ordering::Acquire) {
        let Some(message) = queue.poll_timeout(poll_timeout) else {
            continue;
        };
        dispatch_message(
            &message,
            &message_listeners,
            &notification_listeners,
            &metrics,
        );
    }

    info!("Dispatch thread stopped ({} frames left in queue)", queue.len());
}

/// 分发单帧
///
/// 数据帧发给每个消息监听器；错误帧按优先级分类后最多触发一种通知。
pub fn dispatch_message(
    message: &CanMessage,
    message_listeners: &ListenerRegistry<dyn CanMessageListener>,
    notification_listeners: &ListenerRegistry<dyn CanNotificationListener>,
    metrics: &HandlerMetrics,
) {
    let Some(class) = message.error_class() else {
        metrics.data_frames_dispatched.fetch_add(1, Ordering::Relaxed);
        for listener in message_listeners.snapshot().iter() {
            if !call_isolated("on_message", || listener.on_message(message)) {
                metrics.listener_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        return;
    };

    match class {
        ErrorClass::BusOff => {
            warn!("CAN {} error: {}", class.label(), message);
            notify_all(notification_listeners, metrics, "notify_bus_off_error", |l| {
                l.notify_bus_off_error()
            });
        },
        ErrorClass::Controller(code) => {
            warn!("CAN {} error: {}", class.label(), controller_error_message(code));
            notify_all(notification_listeners, metrics, "notify_controller_error", |l| {
                l.notify_controller_error(code)
            });
        },
        ErrorClass::Protocol(code) => {
            warn!("CAN {} error: {}", class.label(), protocol_error_message(code));
            notify_all(notification_listeners, metrics, "notify_protocol_error", |l| {
                l.notify_protocol_error(code)
            });
        },
        ErrorClass::Restarted => {
            info!("CAN {}", class.label());
            notify_all(
                notification_listeners,
                metrics,
                "notify_controller_restarted",
                |l| l.notify_controller_restarted(),
            );
        },
        ErrorClass::Unrecognized => {
            error!("CAN {} error frame: {}", class.label(), message);
            metrics.unrecognized_error_frames.fetch_add(1, Ordering::Relaxed);
            return;
        },
    }
    metrics.error_frames.fetch_add(1, Ordering::Relaxed);
}

fn notify_all(
    listeners: &ListenerRegistry<dyn CanNotificationListener>,
    metrics: &HandlerMetrics,
    context: &str,
    call: impl Fn(&dyn CanNotificationListener) -> ListenerResult,
) {
    for listener in listeners.snapshot().iter() {
        if !call_isolated(context, || call(listener.as_ref())) {
            metrics.listener_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}
