//! 事件观察者列表：连接的断开、连接与入站命令事件都经由 [`Signal`] 分发。
//!
//! # 设计背景（Why）
//! - 处理器经常在回调内部注销自己或其他处理器（请求竞速在定论后立刻注销两个观察者），
//!   分发过程中的增删不能破坏迭代；
//! - 事件可能由多个线程同时触发，分发路径不应持有会被回调再次获取的锁。
//!
//! # 行为概览（How）
//! - 观察者列表保存在 [`ArcSwap`] 中，增删通过 `rcu` 复制替换；
//! - `emit` 先取得快照再逐个调用，每个槽位带有原子激活位，已注销的槽位即使仍在快照中也会被跳过；
//! - 一次性观察者在调用前以 `swap(false)` 抢占激活位，保证并发触发时只执行一次。

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;

type Callback<E> = Box<dyn Fn(&E) + Send + Sync + 'static>;

struct Slot<E> {
    id: u64,
    once: bool,
    active: Arc<AtomicBool>,
    callback: Callback<E>,
}

struct SignalInner<E> {
    slots: ArcSwap<Vec<Arc<Slot<E>>>>,
    next_id: AtomicU64,
}

trait SlotRemover: Send + Sync {
    fn remove(&self, id: u64);
}

impl<E: 'static> SlotRemover for SignalInner<E> {
    fn remove(&self, id: u64) {
        self.slots.rcu(|current| {
            current
                .iter()
                .filter(|slot| slot.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
    }
}

/// 线程安全的事件分发器。
pub struct Signal<E> {
    inner: Arc<SignalInner<E>>,
}

impl<E: 'static> Default for Signal<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Signal<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("observers", &self.inner.slots.load().len())
            .finish()
    }
}

impl<E: 'static> Signal<E> {
    /// 创建空的分发器。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                slots: ArcSwap::from_pointee(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// 登记持续生效的观察者，直到返回的 [`Registration`] 被注销。
    pub fn subscribe<F>(&self, callback: F) -> Registration
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(false, Box::new(callback))
    }

    /// 登记只触发一次的观察者，触发后自动移除。
    pub fn subscribe_once<F>(&self, callback: F) -> Registration
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(true, Box::new(callback))
    }

    /// 向当前快照中的所有观察者分发事件。
    pub fn emit(&self, event: &E) {
        let snapshot = self.inner.slots.load_full();
        for slot in snapshot.iter() {
            if slot.once {
                if slot.active.swap(false, Ordering::AcqRel) {
                    self.inner.remove(slot.id);
                    (slot.callback)(event);
                }
            } else if slot.active.load(Ordering::Acquire) {
                (slot.callback)(event);
            }
        }
    }

    /// 当前仍登记的观察者数量。
    pub fn observer_count(&self) -> usize {
        self.inner.slots.load().len()
    }

    fn insert(&self, once: bool, callback: Callback<E>) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let slot = Arc::new(Slot {
            id,
            once,
            active: Arc::clone(&active),
            callback,
        });
        self.inner.slots.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&slot));
            next
        });
        let inner: Arc<dyn SlotRemover> = self.inner.clone();
        Registration {
            id,
            active,
            remover: Arc::downgrade(&inner),
        }
    }
}

/// 观察者登记凭证。
///
/// 注销是幂等的：重复调用或在一次性观察者已触发后调用都是安全的空操作。
/// 丢弃凭证不会注销观察者。
#[must_use = "dropping a Registration keeps the observer registered"]
pub struct Registration {
    id: u64,
    active: Arc<AtomicBool>,
    remover: Weak<dyn SlotRemover>,
}

impl Registration {
    /// 注销观察者；返回 `true` 表示本次调用完成了注销。
    pub fn unregister(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::AcqRel);
        if let Some(remover) = self.remover.upgrade() {
            remover.remove(self.id);
        }
        was_active
    }

    /// 观察者是否仍处于激活状态。
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn once_observer_fires_a_single_time() {
        let signal = Signal::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let registration = signal.subscribe_once(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        signal.emit(&1);
        signal.emit(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(signal.observer_count(), 0);
        assert!(!registration.unregister(), "already consumed");
    }

    #[test]
    fn handler_can_unregister_peer_during_dispatch() {
        let signal = Arc::new(Signal::<&'static str>::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let victim_slot: Arc<Mutex<Option<Registration>>> = Arc::new(Mutex::new(None));

        let killer = {
            let log = Arc::clone(&log);
            let victim_slot = Arc::clone(&victim_slot);
            signal.subscribe(move |event| {
                log.lock().push(format!("killer:{event}"));
                if let Some(victim) = victim_slot.lock().as_ref() {
                    victim.unregister();
                }
            })
        };
        let victim = {
            let log = Arc::clone(&log);
            signal.subscribe(move |event| log.lock().push(format!("victim:{event}")))
        };
        *victim_slot.lock() = Some(victim);

        signal.emit(&"a");
        signal.emit(&"b");

        assert_eq!(*log.lock(), vec!["killer:a", "killer:b"]);
        assert_eq!(signal.observer_count(), 1);
        assert!(killer.unregister());
        assert!(!killer.unregister());
        assert_eq!(signal.observer_count(), 0);
    }

    #[test]
    fn handler_can_unregister_itself() {
        let signal = Signal::<u8>::new();
        let own: Arc<Mutex<Option<Registration>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));
        let registration = {
            let own = Arc::clone(&own);
            let hits = Arc::clone(&hits);
            signal.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                if let Some(me) = own.lock().as_ref() {
                    me.unregister();
                }
            })
        };
        *own.lock() = Some(registration);
        signal.emit(&0);
        signal.emit(&0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
