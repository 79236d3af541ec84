//! 监听器系统
//!
//! 两类订阅者：
//!
//! - [`CanMessageListener`]: 接收每一个数据帧
//! - [`CanNotificationListener`]: 接收错误帧子事件和读取故障事件
//!
//! # 并发模型
//!
//! [`ListenerRegistry`] 是写时复制的快照集合（`ArcSwap<Vec<Arc<L>>>`）：
//! 分发线程拿到快照后迭代，注册/移除/清空只替换指针，
//! 不会阻塞也不会破坏正在进行的迭代。
//!
//! # 使用示例
//!
//! ```rust
//! use cancomms_driver::listeners::{CanMessageListener, ListenerRegistry, ListenerResult};
//! use cancomms_can::CanMessage;
//! use crossbeam_channel::{Sender, bounded};
//! use std::sync::Arc;
//!
//! struct Forward(Sender<CanMessage>);
//!
//! impl CanMessageListener for Forward {
//!     fn on_message(&self, message: &CanMessage) -> ListenerResult {
//!         self.0.try_send(*message)?;
//!         Ok(())
//!     }
//! }
//!
//! let registry: ListenerRegistry<dyn CanMessageListener> = ListenerRegistry::new();
//! let (tx, rx) = bounded(8);
//! let listener: Arc<dyn CanMessageListener> = Arc::new(Forward(tx));
//! registry.add(listener.clone());
//!
//! for l in registry.snapshot().iter() {
//!     l.on_message(&CanMessage::new_standard(0x10, &[1])).unwrap();
//! }
//! assert_eq!(rx.try_recv().unwrap().id(), 0x10);
//! assert!(registry.remove(&listener));
//! ```

use arc_swap::ArcSwap;
use cancomms_can::CanMessage;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::error;

/// 监听器回调的返回值
///
/// 返回 `Err` 与 panic 一样会被分发端捕获并记录，不影响其他监听器。
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// 数据帧监听器
///
/// 在分发线程中按注册顺序调用。回调阻塞会阻塞整个分发线程，
/// 队列满后接收线程随之等待（背压）。
pub trait CanMessageListener: Send + Sync {
    fn on_message(&self, message: &CanMessage) -> ListenerResult;
}

/// 读取故障详情
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadFault {
    /// 设备名称
    pub device: String,
    /// 操作系统错误码（errno），没有时为 -1
    pub error_code: i32,
    /// 可读的错误描述
    pub message: String,
}

impl fmt::Display for ReadFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read failure on '{}' (code {}): {}",
            self.device, self.error_code, self.message
        )
    }
}

/// 通知监听器
///
/// 所有方法都有空的默认实现，只需覆盖关心的事件。
/// 错误帧回调在分发线程中调用；`notify_native_read_error` 在独立的故障线程中调用。
pub trait CanNotificationListener: Send + Sync {
    /// 传输层读取失败，接收与分发线程均已停止
    fn notify_native_read_error(&self, fault: &ReadFault) -> ListenerResult {
        let _ = fault;
        Ok(())
    }

    fn notify_bus_off_error(&self) -> ListenerResult {
        Ok(())
    }

    fn notify_controller_restarted(&self) -> ListenerResult {
        Ok(())
    }

    /// `code` 为错误帧 data[1]
    fn notify_controller_error(&self, code: u8) -> ListenerResult {
        let _ = code;
        Ok(())
    }

    /// `code` 为错误帧 data[2]
    fn notify_protocol_error(&self, code: u8) -> ListenerResult {
        let _ = code;
        Ok(())
    }
}

/// 写时复制的监听器集合
pub struct ListenerRegistry<L: ?Sized> {
    entries: ArcSwap<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// 追加监听器（允许重复注册）
    pub fn add(&self, listener: Arc<L>) {
        self.entries.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(listener.clone());
            next
        });
    }

    /// 移除第一个与 `listener` 指向同一分配的条目
    ///
    /// 返回是否找到并移除。
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut removed = false;
        self.entries.rcu(|current| {
            let mut next = Vec::clone(current);
            removed = match next.iter().position(|entry| same_listener(entry, listener)) {
                Some(index) => {
                    next.remove(index);
                    true
                },
                None => false,
            };
            next
        });
        removed
    }

    /// 清空（幂等）
    pub fn clear(&self) {
        self.entries.store(Arc::new(Vec::new()));
    }

    /// 当前注册列表的快照
    pub fn snapshot(&self) -> Arc<Vec<Arc<L>>> {
        self.entries.load_full()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> fmt::Debug for ListenerRegistry<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

/// 只比较数据指针，忽略 vtable
fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// 隔离地调用一个监听器回调
///
/// `Err` 返回值和 panic 都被捕获并以 `error!` 记录。成功返回 `true`。
pub fn call_isolated(context: &str, call: impl FnOnce() -> ListenerResult) -> bool {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("Listener failed in {}: {}", context, e);
            false
        },
        Err(payload) => {
            error!("Listener panicked in {}: {}", context, panic_message(&*payload));
            false
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    #[derive(Default)]
    struct Counting {
        count: AtomicU64,
    }

    impl CanMessageListener for Counting {
        fn on_message(&self, _message: &CanMessage) -> ListenerResult {
            self.count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct Quiet;

    impl CanNotificationListener for Quiet {}

    fn counting() -> (Arc<Counting>, Arc<dyn CanMessageListener>) {
        let concrete = Arc::new(Counting::default());
        let listener: Arc<dyn CanMessageListener> = concrete.clone();
        (concrete, listener)
    }

    #[test]
    fn test_add_remove_first_match() {
        let registry: ListenerRegistry<dyn CanMessageListener> = ListenerRegistry::new();
        let (_a, a) = counting();
        let (_b, b) = counting();

        registry.add(a.clone());
        registry.add(b.clone());
        registry.add(a.clone());
        assert_eq!(registry.len(), 3);

        assert!(registry.remove(&a));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(same_listener(&snapshot[0], &b));
        assert!(same_listener(&snapshot[1], &a));

        let (_c, c) = counting();
        assert!(!registry.remove(&c));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let registry: ListenerRegistry<dyn CanMessageListener> = ListenerRegistry::new();
        let (_a, a) = counting();
        registry.add(a);

        registry.clear();
        assert!(registry.is_empty());
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_unaffected_by_mutation() {
        let registry: ListenerRegistry<dyn CanMessageListener> = ListenerRegistry::new();
        let (concrete, a) = counting();
        registry.add(a.clone());
        registry.add(a.clone());

        let snapshot = registry.snapshot();
        registry.clear();

        let message = CanMessage::new_standard(0x1, &[]);
        for listener in snapshot.iter() {
            listener.on_message(&message).unwrap();
        }
        assert_eq!(concrete.count.load(Ordering::Relaxed), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_add_remove() {
        let registry: Arc<ListenerRegistry<dyn CanMessageListener>> =
            Arc::new(ListenerRegistry::new());

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        let (_c, listener) = counting();
                        registry.add(listener.clone());
                        let _ = registry.snapshot();
                        assert!(registry.remove(&listener));
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_notification_defaults_are_ok() {
        let listener = Quiet;
        assert!(listener.notify_bus_off_error().is_ok());
        assert!(listener.notify_controller_error(0x01).is_ok());
        assert!(
            listener
                .notify_native_read_error(&ReadFault {
                    device: "can0".into(),
                    error_code: 19,
                    message: "No such device".into(),
                })
                .is_ok()
        );
    }

    #[test]
    fn test_call_isolated_catches_err_and_panic() {
        assert!(call_isolated("test", || Ok(())));
        assert!(!call_isolated("test", || Err("boom".into())));
        assert!(!call_isolated("test", || panic!("listener exploded")));
    }

    #[test]
    fn test_read_fault_display() {
        let fault = ReadFault {
            device: "can0".into(),
            error_code: 100,
            message: "Network is down".into(),
        };
        assert_eq!(
            fault.to_string(),
            "read failure on 'can0' (code 100): Network is down"
        );
    }
}
