//! 单次赋值的可观察结果单元。
//!
//! # 设计背景（Why）
//! - 断线、响应到达、发送失败与过期计时器可能在不同线程上同时尝试给同一请求定论；
//!   结果单元必须保证“先到者胜出，后到者静默丢弃”，且不得抛出异常。
//! - 调用方既可能注册回调，也可能 `.await`，测试与同步调用方还需要带超时的阻塞等待。
//!
//! # 行为概览（How）
//! - `state` 原子位通过一次 `compare_exchange` 选出唯一的定论者；
//! - 胜出者在互斥锁内写入结果、取走观察者与 waker，释放锁后按登记顺序逐个通知；
//! - 观察者与 waker 的登记也在同一把锁内检查结果，因此不会出现丢失通知。
//!
//! # 契约说明（What）
//! - 状态迁移：`Pending → Succeeded | Failed | Cancelled`，终态不可再变；
//! - 每个观察者恰好被调用一次，调用发生在执行定论的线程上；
//! - 克隆得到的是同一个单元的句柄，[`ObservableFuture::ptr_eq`] 判定身份。

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{CoreError, codes};

const PENDING: u8 = 0;
const SETTLED: u8 = 1;

/// 结果单元的终态。
#[derive(Clone, Debug)]
pub enum Outcome<T> {
    Succeeded(T),
    Failed(CoreError),
    Cancelled,
}

impl<T> Outcome<T> {
    /// 是否成功。
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    /// 失败原因；成功或取消时为 `None`。
    pub fn cause(&self) -> Option<&CoreError> {
        match self {
            Outcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// 转换为标准 `Result`，取消映射为 `request.cancelled` 错误。
    pub fn into_result(self) -> Result<T, CoreError> {
        match self {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::Failed(err) => Err(err),
            Outcome::Cancelled => Err(CoreError::new(
                codes::REQUEST_CANCELLED,
                "operation was cancelled",
            )),
        }
    }
}

type Observer<T> = Box<dyn FnOnce(&Outcome<T>) + Send + 'static>;

struct Waiters<T> {
    observers: Vec<Observer<T>>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    state: AtomicU8,
    outcome: OnceLock<Outcome<T>>,
    waiters: Mutex<Waiters<T>>,
    settled: Condvar,
}

/// 可观察的单次赋值结果。
///
/// ```rust
/// use tether_core::future::{ObservableFuture, Outcome};
///
/// let future = ObservableFuture::<u32>::pending();
/// let seen = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
/// let counter = seen.clone();
/// future.on_settle(move |outcome| {
///     if let Outcome::Succeeded(v) = outcome {
///         counter.store(*v, std::sync::atomic::Ordering::SeqCst);
///     }
/// });
/// assert!(future.complete(7));
/// assert!(!future.complete(8), "only the first settlement wins");
/// assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 7);
/// ```
pub struct ObservableFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ObservableFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ObservableFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.outcome.get() {
            None => "pending",
            Some(Outcome::Succeeded(_)) => "succeeded",
            Some(Outcome::Failed(_)) => "failed",
            Some(Outcome::Cancelled) => "cancelled",
        };
        f.debug_struct("ObservableFuture")
            .field("state", &state)
            .finish()
    }
}

impl<T> ObservableFuture<T>
where
    T: Send + 'static,
{
    /// 创建处于 `Pending` 的结果单元。
    pub fn pending() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(PENDING),
                outcome: OnceLock::new(),
                waiters: Mutex::new(Waiters {
                    observers: Vec::new(),
                    wakers: Vec::new(),
                }),
                settled: Condvar::new(),
            }),
        }
    }

    /// 创建已成功的结果单元。
    pub fn succeeded(value: T) -> Self {
        let future = Self::pending();
        future.complete(value);
        future
    }

    /// 创建已失败的结果单元。
    pub fn failed(err: CoreError) -> Self {
        let future = Self::pending();
        future.fail(err);
        future
    }

    /// 创建已取消的结果单元。
    pub fn cancelled() -> Self {
        let future = Self::pending();
        future.cancel();
        future
    }

    /// 以成功值定论；返回 `false` 表示此前已定论。
    pub fn complete(&self, value: T) -> bool {
        self.settle(Outcome::Succeeded(value))
    }

    /// 以失败定论。
    pub fn fail(&self, err: CoreError) -> bool {
        self.settle(Outcome::Failed(err))
    }

    /// 以取消定论。
    pub fn cancel(&self) -> bool {
        self.settle(Outcome::Cancelled)
    }

    /// 以给定终态定论。
    ///
    /// 并发调用时只有一次 `compare_exchange` 成功，其余调用返回 `false` 且没有任何副作用。
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        if self
            .shared
            .state
            .compare_exchange(PENDING, SETTLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let (observers, wakers) = {
            let mut waiters = self.shared.waiters.lock();
            // 唯一的 CAS 胜出者才会走到这里，`set` 不会失败。
            let _ = self.shared.outcome.set(outcome);
            self.shared.settled.notify_all();
            (
                std::mem::take(&mut waiters.observers),
                std::mem::take(&mut waiters.wakers),
            )
        };

        if let Some(outcome) = self.shared.outcome.get() {
            for observer in observers {
                observer(outcome);
            }
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// 登记定论观察者；若已定论则在当前线程立即调用。
    pub fn on_settle<F>(&self, observer: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        {
            let mut waiters = self.shared.waiters.lock();
            if self.shared.outcome.get().is_none() {
                waiters.observers.push(Box::new(observer));
                return;
            }
        }
        if let Some(outcome) = self.shared.outcome.get() {
            observer(outcome);
        }
    }

    /// 派生一个映射成功值的新结果单元，失败与取消原样传播。
    pub fn map<U, F>(&self, f: F) -> ObservableFuture<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        let mapped = ObservableFuture::pending();
        let target = mapped.clone();
        self.on_settle(move |outcome| {
            match outcome {
                Outcome::Succeeded(value) => target.complete(f(value)),
                Outcome::Failed(err) => target.fail(err.clone()),
                Outcome::Cancelled => target.cancel(),
            };
        });
        mapped
    }
}

impl<T> ObservableFuture<T> {
    /// 是否已定论。
    pub fn is_done(&self) -> bool {
        self.shared.outcome.get().is_some()
    }

    /// 是否以成功定论。
    pub fn is_success(&self) -> bool {
        matches!(self.shared.outcome.get(), Some(Outcome::Succeeded(_)))
    }

    /// 是否以取消定论。
    pub fn is_cancelled(&self) -> bool {
        matches!(self.shared.outcome.get(), Some(Outcome::Cancelled))
    }

    /// 终态引用；未定论时为 `None`。
    pub fn outcome(&self) -> Option<&Outcome<T>> {
        self.shared.outcome.get()
    }

    /// 失败原因。
    pub fn cause(&self) -> Option<&CoreError> {
        self.outcome().and_then(Outcome::cause)
    }

    /// 两个句柄是否指向同一个结果单元。
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// 阻塞当前线程直到定论或超时，返回终态引用。
    ///
    /// 仅供同步调用方与测试使用；库内逻辑从不调用。
    pub fn wait(&self, timeout: Duration) -> Option<&Outcome<T>> {
        // 超出 `Instant` 范围的超时（例如 `Duration::MAX`）等同于无限等待。
        let deadline = Instant::now().checked_add(timeout);
        let mut waiters = self.shared.waiters.lock();
        while self.shared.outcome.get().is_none() {
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .settled
                        .wait_until(&mut waiters, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.shared.settled.wait(&mut waiters),
            }
        }
        drop(waiters);
        self.shared.outcome.get()
    }
}

impl<T: Clone> Future for ObservableFuture<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.shared.outcome.get() {
            return Poll::Ready(outcome.clone());
        }
        let mut waiters = self.shared.waiters.lock();
        if let Some(outcome) = self.shared.outcome.get() {
            return Poll::Ready(outcome.clone());
        }
        if !waiters.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            waiters.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
