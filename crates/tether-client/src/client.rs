//! 推送客户端装配：连接、重要请求执行器、重连控制器、入站流水线与订阅注册表。
//!
//! # 设计背景（Why）
//! - 订阅属于“期望状态”：调用方声明想要的频道，客户端在每次连接建立后负责把它们重新发出；
//! - 连接确认与订阅都是重要请求，经执行器去重并受存活时长约束，重复的重连事件不会放大请求量。
//!
//! # 执行逻辑（How）
//! 1. [`SignalClient::start`] 在连接的三类事件上登记观察者并启动重连控制器；
//! 2. 连接建立 → 发送连接确认；确认成功 → 逐个重发注册表中的订阅；
//! 3. 连接断开 → 已生效订阅退回 `Pending`，丢弃半帧；重连由控制器按退避策略调度；
//! 4. 入站命令统一交给 [`InboundPipeline::track`] 更新序号账本。
//!
//! # 契约说明（What）
//! - 观察者只持有内部状态的弱引用，客户端被丢弃后回调自动失效；
//! - [`SignalClient::shutdown`] 幂等，之后的请求以 `runtime.shutdown` 失败。

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tether_codec_frame::{Command, Handshake};
use tether_core::connection::{Connection, ConnectionHandle, ConnectionLifecycle};
use tether_core::executor::ImportantRequestExecutor;
use tether_core::future::{ObservableFuture, Outcome};
use tether_core::reconnect::ReconnectController;
use tether_core::signal::{Registration, Signal};
use tether_core::time::Scheduler;

use crate::config::{ClientConfig, ConfigError, RequestConfig};
use crate::pipeline::{GapReport, InboundPipeline};
use crate::requests::{self, SessionWorker, UNSUBSCRIBE};

/// 单个频道订阅的状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// 已登记，等待服务端确认（或等待连接建立）。
    Pending,
    /// 服务端已确认。
    Active,
    /// 服务端拒绝；下次连接建立时会再次尝试。
    Rejected,
}

/// 注册表条目：状态与最近一次发出的订阅请求 ID。
#[derive(Debug)]
struct SubscriptionEntry {
    status: SubscriptionStatus,
    request_id: Option<String>,
}

impl SubscriptionEntry {
    fn pending() -> Self {
        Self {
            status: SubscriptionStatus::Pending,
            request_id: None,
        }
    }
}

/// 推送客户端。
pub struct SignalClient<C>
where
    C: Connection<Outbound = Command, Inbound = Command>,
{
    inner: Arc<ClientInner<C>>,
}

struct ClientInner<C>
where
    C: Connection<Outbound = Command, Inbound = Command>,
{
    connection: Arc<C>,
    scheduler: Arc<dyn Scheduler>,
    requests: RequestConfig,
    session_id: String,
    client_id: RwLock<Option<String>>,
    executor: ImportantRequestExecutor,
    reconnect: ReconnectController,
    worker: SessionWorker<C>,
    pipeline: InboundPipeline,
    subscriptions: DashMap<String, SubscriptionEntry>,
    registrations: Mutex<Vec<Registration>>,
    started: AtomicBool,
}

impl<C> SignalClient<C>
where
    C: Connection<Outbound = Command, Inbound = Command>,
{
    /// 按配置装配客户端；退避参数非法时返回 [`ConfigError::Invalid`]。
    pub fn new(
        connection: Arc<C>,
        scheduler: Arc<dyn Scheduler>,
        config: &ClientConfig,
        session_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let reconnect = ReconnectController::new(Arc::clone(&scheduler), config.backoff_policy()?);
        let lifecycle: Arc<dyn ConnectionLifecycle> = connection.clone();
        reconnect.bind(lifecycle);
        let inner = ClientInner {
            worker: SessionWorker::new(Arc::clone(&connection)),
            executor: ImportantRequestExecutor::new(Arc::clone(&scheduler)),
            pipeline: InboundPipeline::new(config.frame_codec(), config.sequence.floor),
            connection,
            scheduler,
            requests: config.requests.clone(),
            session_id: session_id.into(),
            client_id: RwLock::new(None),
            reconnect,
            subscriptions: DashMap::new(),
            registrations: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// 登记事件观察者并启动重连控制器；已启动时返回 `false`。
    ///
    /// 连接此刻已建立时立即发送连接确认。
    pub fn start(&self) -> bool {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        let connection = &self.inner.connection;
        let registrations = vec![
            {
                let weak = Arc::downgrade(&self.inner);
                connection.connected_events().subscribe(move |handle| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_connected(handle);
                    }
                })
            },
            {
                let weak = Arc::downgrade(&self.inner);
                connection.disconnected_events().subscribe(move |handle| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_disconnected(handle);
                    }
                })
            },
            {
                let weak: Weak<ClientInner<C>> = Arc::downgrade(&self.inner);
                connection.inbound_events().subscribe(move |command| {
                    if let Some(inner) = weak.upgrade() {
                        inner.pipeline.track(command);
                    }
                })
            },
        ];
        self.inner.registrations.lock().extend(registrations);
        self.inner.reconnect.start();
        if connection.is_connected() {
            self.inner.open_session();
        }
        true
    }

    /// 发起连接；成功后由连接事件驱动会话确认与订阅。
    pub fn connect(&self) -> ObservableFuture<ConnectionHandle> {
        self.inner.connection.connect()
    }

    /// 登记频道并发送订阅请求。
    ///
    /// 连接未建立时返回的结果以 `transport.disconnected` 失败，但频道保留在注册表中，
    /// 下次连接确认后自动发出。
    pub fn subscribe(&self, channel: &str) -> ObservableFuture<Command> {
        self.inner
            .subscriptions
            .insert(channel.to_owned(), SubscriptionEntry::pending());
        self.inner.issue_subscribe(channel)
    }

    /// 移除频道；连接在线时尽力通知服务端。返回频道此前是否已登记。
    pub fn unsubscribe(&self, channel: &str) -> bool {
        let Some((_, entry)) = self.inner.subscriptions.remove(channel) else {
            return false;
        };
        if let Some(request_id) = entry.request_id {
            self.inner.executor.cancel(&request_id);
        }
        if self.inner.connection.is_connected() {
            let channel_name = channel.to_owned();
            self.inner
                .connection
                .send(Command::new(UNSUBSCRIBE).with_channel(channel))
                .on_settle(move |outcome| {
                    if let Outcome::Failed(err) = outcome {
                        tracing::debug!(channel = %channel_name, code = err.code(), "unsubscribe not delivered");
                    }
                });
        }
        true
    }

    pub fn subscription_status(&self, channel: &str) -> Option<SubscriptionStatus> {
        self.inner
            .subscriptions
            .get(channel)
            .map(|entry| entry.value().status)
    }

    /// 注册表快照，按频道名排序。
    pub fn subscriptions(&self) -> Vec<(String, SubscriptionStatus)> {
        let mut snapshot: Vec<_> = self
            .inner
            .subscriptions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    /// 记录握手给出的客户端 ID，之后的请求 ID 以它派生。
    pub fn apply_handshake(&self, handshake: &Handshake) {
        *self.inner.client_id.write() = Some(handshake.client_id().to_owned());
    }

    pub fn client_id(&self) -> Option<String> {
        self.inner.client_id.read().clone()
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.inner.connection
    }

    pub fn pipeline(&self) -> &InboundPipeline {
        &self.inner.pipeline
    }

    /// 缺口上报事件。
    pub fn gaps(&self) -> &Signal<GapReport> {
        self.inner.pipeline.gaps()
    }

    pub fn executor(&self) -> &ImportantRequestExecutor {
        &self.inner.executor
    }

    pub fn reconnect(&self) -> &ReconnectController {
        &self.inner.reconnect
    }

    /// 注销观察者、停止重连并取消所有未定论的请求。
    pub fn shutdown(&self) {
        let registrations = std::mem::take(&mut *self.inner.registrations.lock());
        for registration in &registrations {
            registration.unregister();
        }
        self.inner.reconnect.stop();
        self.inner.executor.shutdown();
    }
}

impl<C> ClientInner<C>
where
    C: Connection<Outbound = Command, Inbound = Command>,
{
    fn client_id(&self) -> Option<String> {
        self.client_id.read().clone()
    }

    fn on_connected(self: &Arc<Self>, handle: &ConnectionHandle) {
        tracing::info!(connection = handle.id(), "connection established");
        self.open_session();
    }

    fn on_disconnected(&self, handle: &ConnectionHandle) {
        tracing::info!(
            connection = handle.id(),
            via_network = handle.disconnected_via_network(),
            "connection lost"
        );
        self.pipeline.reset_framing();
        for mut entry in self.subscriptions.iter_mut() {
            if entry.status == SubscriptionStatus::Active {
                entry.status = SubscriptionStatus::Pending;
            }
        }
    }

    fn open_session(self: &Arc<Self>) -> ObservableFuture<Command> {
        let request = requests::connect_request(
            &self.session_id,
            self.client_id().as_deref(),
            self.scheduler.now(),
            self.requests.connect_ttl(),
        );
        let request_id = request.request_id().to_owned();
        let worker = self.worker.clone();
        let outbound = request.clone();
        let reply = self
            .executor
            .execute(request, move || Ok(worker.exchange(&outbound)));

        let weak = Arc::downgrade(self);
        reply.on_settle(move |outcome| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match outcome {
                Outcome::Succeeded(command) => match requests::rejection(command) {
                    Some(reason) => {
                        tracing::warn!(request_id = %request_id, reason, "session rejected")
                    }
                    None => inner.resubscribe_all(),
                },
                Outcome::Failed(err) => {
                    tracing::warn!(request_id = %request_id, code = err.code(), "session confirmation failed")
                }
                Outcome::Cancelled => {}
            }
        });
        reply
    }

    fn resubscribe_all(self: &Arc<Self>) {
        let channels: Vec<String> = self
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        tracing::debug!(count = channels.len(), "reissuing subscriptions");
        for channel in channels {
            if let Some(mut entry) = self.subscriptions.get_mut(&channel) {
                entry.status = SubscriptionStatus::Pending;
            }
            self.issue_subscribe(&channel);
        }
    }

    fn issue_subscribe(self: &Arc<Self>, channel: &str) -> ObservableFuture<Command> {
        let request = requests::subscribe_request(
            &self.session_id,
            self.client_id().as_deref(),
            channel,
            self.scheduler.now(),
            self.requests.subscribe_ttl(),
        );
        if let Some(mut entry) = self.subscriptions.get_mut(channel) {
            entry.request_id = Some(request.request_id().to_owned());
        }
        let worker = self.worker.clone();
        let outbound = request.clone();
        let reply = self
            .executor
            .execute(request, move || Ok(worker.exchange(&outbound)));

        let weak = Arc::downgrade(self);
        let channel = channel.to_owned();
        reply.on_settle(move |outcome| {
            if let Some(inner) = weak.upgrade() {
                inner.finish_subscribe(&channel, outcome);
            }
        });
        reply
    }

    fn finish_subscribe(&self, channel: &str, outcome: &Outcome<Command>) {
        let status = match outcome {
            Outcome::Succeeded(reply) => match requests::rejection(reply) {
                Some(reason) => {
                    tracing::warn!(channel, reason, "subscription rejected");
                    SubscriptionStatus::Rejected
                }
                None => {
                    tracing::info!(channel, "subscribed");
                    SubscriptionStatus::Active
                }
            },
            Outcome::Failed(err) => {
                tracing::debug!(channel, code = err.code(), "subscription attempt failed");
                return;
            }
            Outcome::Cancelled => return,
        };
        if let Some(mut entry) = self.subscriptions.get_mut(channel) {
            entry.status = status;
        }
    }
}

impl<C> Drop for SignalClient<C>
where
    C: Connection<Outbound = Command, Inbound = Command>,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<C> fmt::Debug for SignalClient<C>
where
    C: Connection<Outbound = Command, Inbound = Command>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalClient")
            .field("session_id", &self.inner.session_id)
            .field("client_id", &self.client_id())
            .field("subscriptions", &self.inner.subscriptions.len())
            .field("pending_requests", &self.inner.executor.pending_count())
            .finish_non_exhaustive()
    }
}
