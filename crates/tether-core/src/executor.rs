//! 重要请求执行器：按请求 ID 去重、桥接内部结果、强制过期。
//!
//! # 设计背景（Why）
//! - 连接、订阅等请求是幂等的，上层在重连、重试、用户重复操作时可能多次提交同一逻辑请求；
//!   同一时刻只允许一次执行在途，重复提交应拿到同一个结果单元；
//! - 传输层超时无法覆盖“服务端收到但永不回应”的情况，请求需要独立于传输的过期时间。
//!
//! # 执行逻辑（How）
//! 1. 带 ID 的提交先在 `DashMap` 的条目上完成“查重或占位”，随即释放分片锁；
//! 2. 占位成功后登记过期计时器，再调用任务工厂获得内部结果单元并把其终态桥接到外部；
//! 3. 外部结果单元以任意路径定论后，按占位令牌移除条目，并取消过期计时器。
//!
//! # 契约说明（What）
//! - 返回的结果单元立即可用，调用线程从不阻塞；
//! - 过期以 `request.timeout` 失败定论，内部结果单元随即被取消，迟到的内部结果被忽略；
//! - 调用方取消外部结果单元时，取消同样传递给内部结果单元；
//! - 同一 ID 在途期间若以不同结果类型提交，返回 `contract.type_mismatch` 失败。

use std::any::{Any, type_name};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{CoreError, Result, codes};
use crate::future::{ObservableFuture, Outcome};
use crate::request::ImportantRequest;
use crate::time::Scheduler;

trait PendingFuture: Send + Sync {
    fn is_done(&self) -> bool;
    fn cancel(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<R> PendingFuture for ObservableFuture<R>
where
    R: Send + Sync + 'static,
{
    fn is_done(&self) -> bool {
        ObservableFuture::is_done(self)
    }

    fn cancel(&self) -> bool {
        ObservableFuture::cancel(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct PendingEntry {
    token: u64,
    request: Option<ImportantRequest>,
    future: Arc<dyn PendingFuture>,
}

struct ExecutorInner {
    scheduler: Arc<dyn Scheduler>,
    pending: DashMap<String, PendingEntry>,
    next_token: AtomicU64,
    shut_down: AtomicBool,
}

impl ExecutorInner {
    fn release(&self, request_id: &str, token: u64) {
        self.pending
            .remove_if(request_id, |_, entry| entry.token == token);
    }
}

enum Slot<R> {
    Fresh,
    Existing(ObservableFuture<R>),
    Mismatch,
}

/// 去重、可过期的重要请求执行器。
///
/// 调度器由调用方显式注入；执行器被丢弃或调用 [`shutdown`](Self::shutdown) 时取消全部在途请求。
pub struct ImportantRequestExecutor {
    inner: Arc<ExecutorInner>,
}

impl ImportantRequestExecutor {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                scheduler,
                pending: DashMap::new(),
                next_token: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// 执行器使用的调度器。
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inner.scheduler
    }

    /// 提交一个任务。
    ///
    /// - `request_id` 为 `Some` 且已有未定论的条目时，直接返回该条目的结果单元，`task` 不会被调用；
    /// - `expires_at` 为 `Some` 时，到期仍未定论的结果以 `request.timeout` 失败；
    /// - `task` 同步返回错误时，结果单元立即以该错误失败。
    pub fn enqueue<R, F>(
        &self,
        request_id: Option<&str>,
        task: F,
        expires_at: Option<Instant>,
    ) -> ObservableFuture<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<ObservableFuture<R>>,
    {
        self.submit(request_id.map(str::to_owned), None, task, expires_at)
    }

    /// 以 [`ImportantRequest`] 的 ID 与过期时间提交任务，并保留请求快照供重放。
    pub fn execute<R, F>(&self, request: ImportantRequest, task: F) -> ObservableFuture<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<ObservableFuture<R>>,
    {
        let request_id = request.request_id().to_owned();
        let expires_at = request.expires_at();
        self.submit(Some(request_id), Some(request), task, Some(expires_at))
    }

    fn submit<R, F>(
        &self,
        request_id: Option<String>,
        request: Option<ImportantRequest>,
        task: F,
        expires_at: Option<Instant>,
    ) -> ObservableFuture<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<ObservableFuture<R>>,
    {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return ObservableFuture::failed(CoreError::new(
                codes::RUNTIME_SHUTDOWN,
                "important request executor has been shut down",
            ));
        }

        let outer = ObservableFuture::<R>::pending();
        let label = request_id.clone().unwrap_or_else(|| "<anonymous>".to_owned());

        if let Some(id) = request_id {
            let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
            let entry = PendingEntry {
                token,
                request,
                future: Arc::new(outer.clone()),
            };
            let slot = match self.inner.pending.entry(id.clone()) {
                Entry::Occupied(mut occupied) => {
                    let existing = &occupied.get().future;
                    let slot = match existing.as_any().downcast_ref::<ObservableFuture<R>>() {
                        Some(future) if !future.is_done() => Slot::Existing(future.clone()),
                        None if !existing.is_done() => Slot::Mismatch,
                        _ => Slot::Fresh,
                    };
                    if matches!(slot, Slot::Fresh) {
                        // 已定论但尚未被观察者移除的旧条目，直接覆盖。
                        occupied.insert(entry);
                    }
                    slot
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(entry);
                    Slot::Fresh
                }
            };

            match slot {
                Slot::Existing(future) => {
                    tracing::debug!(request_id = %id, "important request deduplicated");
                    return future;
                }
                Slot::Mismatch => {
                    return ObservableFuture::failed(CoreError::new(
                        codes::CONTRACT_TYPE_MISMATCH,
                        format!(
                            "request `{id}` is already in flight with a result type other than `{}`",
                            type_name::<R>()
                        ),
                    ));
                }
                Slot::Fresh => {}
            }

            let weak: Weak<ExecutorInner> = Arc::downgrade(&self.inner);
            outer.on_settle(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.release(&id, token);
                }
            });

            // 插入可能晚于并发 shutdown 的清空，此时由提交方自行取消。
            if self.inner.shut_down.load(Ordering::SeqCst) {
                outer.cancel();
                return outer;
            }
        }

        if let Some(deadline) = expires_at {
            let now = self.inner.scheduler.now();
            if deadline <= now {
                tracing::warn!(request_id = %label, "important request expired before start");
                outer.fail(expired(&label));
                return outer;
            }
            let target = outer.clone();
            let timer_label = label.clone();
            let timer = self.inner.scheduler.schedule(
                deadline - now,
                Box::new(move || {
                    if target.fail(expired(&timer_label)) {
                        tracing::warn!(request_id = %timer_label, "important request expired");
                    }
                }),
            );
            outer.on_settle(move |_| {
                timer.cancel();
            });
        }

        match task() {
            Ok(inner) => {
                let target = outer.clone();
                inner.on_settle(move |outcome| {
                    match outcome {
                        Outcome::Succeeded(value) => target.complete(value.clone()),
                        Outcome::Failed(err) => target.fail(err.clone()),
                        Outcome::Cancelled => target.cancel(),
                    };
                });
                // 外部先定论（过期或被取消）时放弃内部执行。
                outer.on_settle(move |_| {
                    inner.cancel();
                });
            }
            Err(err) => {
                tracing::debug!(request_id = %label, code = err.code(), "important request task failed to start");
                outer.fail(err);
            }
        }
        outer
    }

    /// 取消指定 ID 的在途请求。
    pub fn cancel(&self, request_id: &str) -> bool {
        let future = self
            .inner
            .pending
            .get(request_id)
            .map(|entry| Arc::clone(&entry.future));
        future.is_some_and(|future| future.cancel())
    }

    /// 指定 ID 是否有未定论的请求。
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.inner
            .pending
            .get(request_id)
            .is_some_and(|entry| !entry.future.is_done())
    }

    /// 在途请求数量。
    pub fn pending_count(&self) -> usize {
        self.inner
            .pending
            .iter()
            .filter(|entry| !entry.future.is_done())
            .count()
    }

    /// 通过 [`execute`](Self::execute) 提交且仍在途的请求快照。
    pub fn pending_requests(&self) -> Vec<ImportantRequest> {
        self.inner
            .pending
            .iter()
            .filter(|entry| !entry.future.is_done())
            .filter_map(|entry| entry.request.clone())
            .collect()
    }

    /// 拒绝后续提交并取消全部在途请求；幂等。
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let futures: Vec<_> = self
            .inner
            .pending
            .iter()
            .map(|entry| Arc::clone(&entry.future))
            .collect();
        self.inner.pending.clear();
        let cancelled = futures.iter().filter(|future| future.cancel()).count();
        if cancelled > 0 {
            tracing::debug!(cancelled, "important request executor shut down");
        }
    }
}

impl fmt::Debug for ImportantRequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportantRequestExecutor")
            .field("pending", &self.inner.pending.len())
            .field("shut_down", &self.inner.shut_down.load(Ordering::Acquire))
            .finish()
    }
}

impl Drop for ImportantRequestExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn expired(request_id: &str) -> CoreError {
    CoreError::timeout(format!(
        "important request `{request_id}` expired before completion"
    ))
}
