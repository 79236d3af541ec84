//! CAN 通讯处理器
//!
//! 对外的 [`CanCommsHandler`]：持有传输层句柄，管理接收/分发两个后台线程的生命周期，
//! 并提供发送与监听器注册接口。

use crate::error::DriverError;
use crate::listeners::{CanMessageListener, CanNotificationListener, ListenerRegistry};
use crate::metrics::{HandlerMetrics, MetricsSnapshot};
use crate::pipeline::{PipelineConfig, ReceiverContext, RunFlags, dispatch_loop, receiver_loop};
use crate::queue::FrameQueue;
use arc_swap::ArcSwap;
use cancomms_can::{CanError, CanFilter, CanMessage, CanTransport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 接收线程名称
pub const RECEIVER_THREAD_NAME: &str = "cancomms-rx";
/// 分发线程名称
pub const DISPATCH_THREAD_NAME: &str = "cancomms-dispatch";
/// Drop 时代为 join 的 watchdog 线程名称
pub const JOIN_WATCHDOG_THREAD_NAME: &str = "cancomms-join";

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        // watchdog 线程代为 join，超时后留给进程退出时回收
        thread::Builder::new()
            .name(JOIN_WATCHDOG_THREAD_NAME.to_string())
            .spawn(move || {
                let _ = tx.send(self.join().map(|_| ()));
            })
            .map_err(|e| Box::new(e) as Box<dyn std::any::Any + Send>)?;

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(Box::new(
                std::io::Error::new(std::io::ErrorKind::TimedOut, "Thread join timeout"),
            )),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(Box::new(
                std::io::Error::other("Join watchdog exited without a result"),
            )),
        }
    }
}

/// 后台线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotStarted,
    Running,
    Stopped,
}

/// 单个后台线程的句柄槽位
#[derive(Debug, Default)]
struct TaskSlot {
    handle: Mutex<Option<JoinHandle<()>>>,
    ever_started: AtomicBool,
}

impl TaskSlot {
    fn state(&self) -> TaskState {
        match self.handle.lock().as_ref() {
            Some(handle) if !handle.is_finished() => TaskState::Running,
            _ if self.ever_started.load(Ordering::Acquire) => TaskState::Stopped,
            _ => TaskState::NotStarted,
        }
    }

    fn install(&self, handle: JoinHandle<()>) {
        *self.handle.lock() = Some(handle);
        self.ever_started.store(true, Ordering::Release);
    }

    /// 取出待 join 的句柄
    ///
    /// 当前线程就是该任务本身时（例如在监听器回调中调用 stop）不能 join 自己：
    /// 句柄留在槽位中，线程返回后看到已清除的运行标志自行退出，
    /// 在此之前 `state()` 仍为 `Running`，`start()` 不会复用它的运行标志。
    fn take_joinable(&self, name: &str) -> Option<JoinHandle<()>> {
        let mut slot = self.handle.lock();
        if slot
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
        {
            debug!("{} thread is stopping itself, skipping join", name);
            return None;
        }
        slot.take()
    }

    /// 阻塞 join；线程 panic 时记录日志
    fn join(&self, name: &str) {
        if let Some(handle) = self.take_joinable(name)
            && handle.join().is_err()
        {
            error!("{} thread panicked", name);
        }
    }

    fn join_with_timeout(&self, name: &str, timeout: Duration) {
        if let Some(handle) = self.take_joinable(name)
            && handle.join_timeout(timeout).is_err()
        {
            error!(
                "{} thread panicked or failed to shut down within {:?}",
                name, timeout
            );
        }
    }
}

/// CAN 通讯处理器
///
/// # 生命周期
///
/// ```text
/// open ──> start ──> (Running) ──> stop ──> reopen ──> start ...
///                        │
///                   读取故障：两个线程自行停止，通知监听器
/// ```
///
/// 所有方法都只需要 `&self`，可以放进 `Arc` 在多个线程间共享。
///
/// # 示例
///
/// ```no_run
/// use cancomms_driver::{CanCommsHandler, PipelineConfig};
/// use cancomms_can::{CanFilter, CanMessage, SocketCanTransport};
///
/// let handler = CanCommsHandler::open(
///     SocketCanTransport::new(),
///     "can0",
///     &[CanFilter::accept_all()],
///     PipelineConfig::default(),
/// )
/// .unwrap();
/// handler.start().unwrap();
/// handler.transmit(&CanMessage::new_standard(0x123, &[1, 2])).unwrap();
/// handler.stop().unwrap();
/// ```
pub struct CanCommsHandler<T: CanTransport> {
    device: String,
    filters: Vec<CanFilter>,
    transport: Arc<T>,
    /// 当前句柄，`reopen` 时整体替换
    handle: ArcSwap<T::Handle>,
    /// 句柄是否已关闭（由 stop 设置，reopen 清除）
    handle_closed: AtomicBool,
    queue: FrameQueue,
    message_listeners: Arc<ListenerRegistry<dyn CanMessageListener>>,
    notification_listeners: Arc<ListenerRegistry<dyn CanNotificationListener>>,
    flags: RunFlags,
    receiver: TaskSlot,
    dispatcher: TaskSlot,
    /// 串行化 start / stop / reopen
    lifecycle: Mutex<()>,
    config: PipelineConfig,
    metrics: Arc<HandlerMetrics>,
}

impl<T: CanTransport> CanCommsHandler<T> {
    /// 打开设备并应用过滤器
    ///
    /// 打开失败同步返回。打开后线程尚未启动，需要调用 [`start`](Self::start)。
    pub fn open(
        transport: T,
        device: impl Into<String>,
        filters: &[CanFilter],
        config: PipelineConfig,
    ) -> Result<Self, DriverError> {
        let device = device.into();
        let handle = transport
            .open(&device, filters)
            .inspect_err(|e| log_open_failure(&device, e))?;
        info!(
            "Opened CAN device '{}' with {} filter(s)",
            device,
            filters.len()
        );

        Ok(Self {
            filters: filters.to_vec(),
            transport: Arc::new(transport),
            handle: ArcSwap::from_pointee(handle),
            handle_closed: AtomicBool::new(false),
            queue: FrameQueue::new(config.queue_capacity),
            message_listeners: Arc::new(ListenerRegistry::new()),
            notification_listeners: Arc::new(ListenerRegistry::new()),
            flags: RunFlags::new(),
            receiver: TaskSlot::default(),
            dispatcher: TaskSlot::default(),
            lifecycle: Mutex::new(()),
            config,
            metrics: Arc::new(HandlerMetrics::new()),
            device,
        })
    }

    /// 启动分发线程和接收线程（先分发后接收）
    ///
    /// # 错误
    /// - `DriverError::AlreadyRunning`: 任一线程仍在运行
    /// - `DriverError::Can(CanError::Closed)`: 句柄已被 `stop` 关闭，需先 `reopen`
    /// - `DriverError::ThreadSpawn`: 线程创建失败（已回滚）
    pub fn start(&self) -> Result<(), DriverError> {
        let _guard = self.lifecycle.lock();

        if self.receiver.state() == TaskState::Running
            || self.dispatcher.state() == TaskState::Running
        {
            return Err(DriverError::AlreadyRunning);
        }
        if self.handle_closed.load(Ordering::Acquire) {
            return Err(DriverError::Can(CanError::Closed));
        }

        // 回收上一次运行（例如读取故障后）已结束的线程
        self.receiver.join(RECEIVER_THREAD_NAME);
        self.dispatcher.join(DISPATCH_THREAD_NAME);

        let stale = self.queue.clear();
        if stale > 0 {
            debug!("Discarded {} stale frame(s) from previous run", stale);
        }

        // 1. 分发线程先就绪，避免帧滞留在没有消费者的队列中
        self.flags.dispatcher.store(true, Ordering::Release);
        let dispatcher = {
            let queue = self.queue.clone();
            let is_running = self.flags.dispatcher.clone();
            let message_listeners = self.message_listeners.clone();
            let notification_listeners = self.notification_listeners.clone();
            let metrics = self.metrics.clone();
            let poll_timeout = self.config.poll_timeout();
            thread::Builder::new()
                .name(DISPATCH_THREAD_NAME.to_string())
                .spawn(move || {
                    dispatch_loop(
                        queue,
                        is_running,
                        message_listeners,
                        notification_listeners,
                        metrics,
                        poll_timeout,
                    )
                })
        };
        match dispatcher {
            Ok(handle) => self.dispatcher.install(handle),
            Err(e) => {
                self.flags.dispatcher.store(false, Ordering::Release);
                return Err(DriverError::ThreadSpawn(e.to_string()));
            },
        }

        // 2. 接收线程
        self.flags.receiver.store(true, Ordering::Release);
        let ctx = ReceiverContext {
            transport: self.transport.clone(),
            handle: self.handle.load_full(),
            device: self.device.clone(),
            queue: self.queue.clone(),
            flags: self.flags.clone(),
            notification_listeners: self.notification_listeners.clone(),
            metrics: self.metrics.clone(),
            backpressure_wait: self.config.poll_timeout(),
        };
        let receiver = thread::Builder::new()
            .name(RECEIVER_THREAD_NAME.to_string())
            .spawn(move || receiver_loop(ctx));
        match receiver {
            Ok(handle) => self.receiver.install(handle),
            Err(e) => {
                self.flags.clear_all();
                self.dispatcher.join(DISPATCH_THREAD_NAME);
                return Err(DriverError::ThreadSpawn(e.to_string()));
            },
        }

        info!("CAN comms handler on '{}' started", self.device);
        Ok(())
    }

    /// 停止两个线程并关闭句柄
    ///
    /// 顺序：清除接收标志并 join → 清除分发标志并 join → 关闭句柄。
    /// 返回时两个线程都已退出。关闭失败时返回错误（线程仍已停止）。
    pub fn stop(&self) -> Result<(), DriverError> {
        let _guard = self.lifecycle.lock();

        self.flags.receiver.store(false, Ordering::Release);
        self.receiver.join(RECEIVER_THREAD_NAME);

        self.flags.dispatcher.store(false, Ordering::Release);
        self.dispatcher.join(DISPATCH_THREAD_NAME);

        let result = self.transport.close(&self.device, &self.handle.load());
        self.handle_closed.store(true, Ordering::Release);

        match result {
            Ok(()) => {
                info!("CAN comms handler on '{}' stopped", self.device);
                Ok(())
            },
            Err(e) => {
                error!("Failed to close CAN device '{}': {}", self.device, e);
                Err(e.into())
            },
        }
    }

    /// 用保存的设备名和过滤器重新打开句柄（仅在线程都已停止时）
    ///
    /// 用于读取故障后恢复：`stop()` → `reopen()` → `start()`。
    pub fn reopen(&self) -> Result<(), DriverError> {
        let _guard = self.lifecycle.lock();

        if self.receiver.state() == TaskState::Running
            || self.dispatcher.state() == TaskState::Running
        {
            return Err(DriverError::NotStopped);
        }

        if !self.handle_closed.load(Ordering::Acquire)
            && let Err(e) = self.transport.close(&self.device, &self.handle.load())
        {
            warn!("Closing previous handle of '{}' failed: {}", self.device, e);
        }

        let handle = self
            .transport
            .open(&self.device, &self.filters)
            .inspect_err(|e| log_open_failure(&self.device, e))?;
        self.handle.store(Arc::new(handle));
        self.handle_closed.store(false, Ordering::Release);
        info!("Reopened CAN device '{}'", self.device);
        Ok(())
    }

    /// 同步发送一帧
    ///
    /// 失败直接返回，不影响运行状态。
    pub fn transmit(&self, message: &CanMessage) -> Result<(), DriverError> {
        match self.transport.transmit(&self.handle.load(), message) {
            Ok(()) => {
                self.metrics.tx_frames_total.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(e) => {
                self.metrics.tx_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Transmit of {} on '{}' failed: {}", message, self.device, e);
                Err(e.into())
            },
        }
    }

    pub fn add_message_listener(&self, listener: Arc<dyn CanMessageListener>) {
        self.message_listeners.add(listener);
    }

    /// 移除第一个相同的监听器，返回是否找到
    pub fn remove_message_listener(&self, listener: &Arc<dyn CanMessageListener>) -> bool {
        self.message_listeners.remove(listener)
    }

    pub fn clear_message_listeners(&self) {
        self.message_listeners.clear();
    }

    pub fn add_notification_listener(&self, listener: Arc<dyn CanNotificationListener>) {
        self.notification_listeners.add(listener);
    }

    pub fn remove_notification_listener(
        &self,
        listener: &Arc<dyn CanNotificationListener>,
    ) -> bool {
        self.notification_listeners.remove(listener)
    }

    pub fn clear_notification_listeners(&self) {
        self.notification_listeners.clear();
    }

    pub fn message_listener_count(&self) -> usize {
        self.message_listeners.len()
    }

    pub fn notification_listener_count(&self) -> usize {
        self.notification_listeners.len()
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn filters(&self) -> &[CanFilter] {
        &self.filters
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn receiver_state(&self) -> TaskState {
        self.receiver.state()
    }

    pub fn dispatcher_state(&self) -> TaskState {
        self.dispatcher.state()
    }

    /// 任一线程处于运行状态
    pub fn is_running(&self) -> bool {
        self.receiver_state() == TaskState::Running || self.dispatcher_state() == TaskState::Running
    }

    /// 当前运行标志 `(receiver, dispatcher)`
    pub fn run_flags(&self) -> (bool, bool) {
        (
            self.flags.receiver_running(),
            self.flags.dispatcher_running(),
        )
    }

    /// 队列中等待分发的帧数
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn log_open_failure(device: &str, err: &CanError) {
    match err {
        CanError::Device(e) if e.is_fatal() => {
            error!("Cannot open CAN device '{}': {} (not retryable)", device, e)
        },
        _ => warn!("Opening CAN device '{}' failed: {}", device, err),
    }
}

impl<T: CanTransport> Drop for CanCommsHandler<T> {
    fn drop(&mut self) {
        self.flags.clear_all();

        let join_timeout = self.config.join_timeout();
        self.receiver
            .join_with_timeout(RECEIVER_THREAD_NAME, join_timeout);
        self.dispatcher
            .join_with_timeout(DISPATCH_THREAD_NAME, join_timeout);

        if !self.handle_closed.swap(true, Ordering::AcqRel)
            && let Err(e) = self.transport.close(&self.device, &self.handle.load())
        {
            warn!("Closing '{}' on drop failed: {}", self.device, e);
        }
    }
}
