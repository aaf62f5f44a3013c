//! 连接相关的测试桩，供单元测试、集成测试与上层 crate 复用。
//!
//! # 设计定位（Why）
//! - 重连控制器、请求 worker 与客户端装配都依赖 [`Connection`] 契约，但测试只关心事件与调用序列；
//! - 集中维护一个可编排的连接替身，避免各测试文件重复实现同一套事件分发。
//!
//! # 使用方式（How）
//! - 通过 [`MockConnection::script_connect`] / [`MockConnection::script_send`] 预置后续调用的结果，
//!   未预置时 `connect` 成功、`send` 返回 `true`；
//! - 以 [`MockConnection::fire_disconnect`] 模拟传输故障，以 [`MockConnection::deliver`] 注入入站命令；
//! - 通过 `sent`、`connect_calls`、`disconnect_calls` 断言调用序列。
//!
//! # 契约说明（What）
//! - 所有事件都在调用方线程上同步分发；
//! - 桩对象不做任何 IO，适合与 [`MockScheduler`](crate::time::MockScheduler) 组合驱动确定性测试。

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::connection::{Connection, ConnectionHandle, ConnectionLifecycle};
use crate::error::{CoreError, codes};
use crate::future::ObservableFuture;
use crate::signal::Signal;

/// `connect` 调用的预置结果。
#[derive(Clone, Debug)]
pub enum ConnectStep {
    /// 建立连接并分发连接事件。
    Succeed,
    /// 以给定错误失败。
    Fail(CoreError),
}

/// `send` 调用的预置结果。
#[derive(Clone, Debug)]
pub enum SendStep {
    /// 立即以给定布尔值成功。
    Deliver(bool),
    /// 立即失败。
    Fail(CoreError),
    /// 立即取消。
    Cancel,
    /// 返回未定论的结果单元，可通过 [`MockConnection::held_sends`] 取得后手动定论。
    Hold,
}

struct State<O> {
    current: Option<ConnectionHandle>,
    connect_script: VecDeque<ConnectStep>,
    send_script: VecDeque<SendStep>,
    sent: Vec<O>,
    held_sends: Vec<ObservableFuture<bool>>,
    disconnect_calls: Vec<bool>,
}

/// 可编排的内存连接。
pub struct MockConnection<O, I> {
    state: Mutex<State<O>>,
    connect_calls: AtomicUsize,
    connected_events: Signal<ConnectionHandle>,
    disconnected_events: Signal<ConnectionHandle>,
    inbound: Signal<I>,
}

impl<O, I> MockConnection<O, I>
where
    O: Send + 'static,
    I: Send + Sync + 'static,
{
    /// 创建处于断开状态的连接。
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                current: None,
                connect_script: VecDeque::new(),
                send_script: VecDeque::new(),
                sent: Vec::new(),
                held_sends: Vec::new(),
                disconnect_calls: Vec::new(),
            }),
            connect_calls: AtomicUsize::new(0),
            connected_events: Signal::new(),
            disconnected_events: Signal::new(),
            inbound: Signal::new(),
        }
    }

    /// 创建并立即建立连接（会分发一次连接事件）。
    pub fn connected() -> Self {
        let connection = Self::new();
        connection.establish();
        connection
    }

    /// 追加一个 `connect` 结果。
    pub fn script_connect(&self, step: ConnectStep) {
        self.state.lock().connect_script.push_back(step);
    }

    /// 追加一个 `send` 结果。
    pub fn script_send(&self, step: SendStep) {
        self.state.lock().send_script.push_back(step);
    }

    /// 模拟连接丢失：当前连接（若有）标记为断开并分发断开事件。
    pub fn fire_disconnect(&self, via_network: bool) -> ConnectionHandle {
        let handle = self
            .state
            .lock()
            .current
            .take()
            .unwrap_or_else(ConnectionHandle::next)
            .disconnected(via_network);
        self.disconnected_events.emit(&handle);
        handle
    }

    /// 注入一条入站命令。
    pub fn deliver(&self, inbound: I) {
        self.inbound.emit(&inbound);
    }

    /// `connect` 被调用的次数。
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// 每次 `disconnect` 调用携带的 `network_caused` 参数。
    pub fn disconnect_calls(&self) -> Vec<bool> {
        self.state.lock().disconnect_calls.clone()
    }

    /// 已发送消息数量。
    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    /// 取出 [`SendStep::Hold`] 产生的未定论结果单元。
    pub fn held_sends(&self) -> Vec<ObservableFuture<bool>> {
        std::mem::take(&mut self.state.lock().held_sends)
    }

    fn establish(&self) -> ConnectionHandle {
        let handle = ConnectionHandle::next();
        self.state.lock().current = Some(handle);
        self.connected_events.emit(&handle);
        handle
    }
}

impl<O, I> MockConnection<O, I>
where
    O: Clone + Send + 'static,
    I: Send + Sync + 'static,
{
    /// 已发送消息的快照。
    pub fn sent(&self) -> Vec<O> {
        self.state.lock().sent.clone()
    }
}

impl<O, I> Default for MockConnection<O, I>
where
    O: Send + 'static,
    I: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<O, I> fmt::Debug for MockConnection<O, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockConnection")
            .field("current", &state.current)
            .field("sent", &state.sent.len())
            .field("connect_calls", &self.connect_calls.load(Ordering::SeqCst))
            .finish()
    }
}

impl<O, I> ConnectionLifecycle for MockConnection<O, I>
where
    O: Send + 'static,
    I: Send + Sync + 'static,
{
    fn connect(&self) -> ObservableFuture<ConnectionHandle> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .state
            .lock()
            .connect_script
            .pop_front()
            .unwrap_or(ConnectStep::Succeed);
        match step {
            ConnectStep::Succeed => ObservableFuture::succeeded(self.establish()),
            ConnectStep::Fail(err) => ObservableFuture::failed(err),
        }
    }

    fn disconnect(&self, network_caused: bool) -> ObservableFuture<()> {
        let current = {
            let mut state = self.state.lock();
            state.disconnect_calls.push(network_caused);
            state.current.take()
        };
        if let Some(handle) = current {
            self.disconnected_events
                .emit(&handle.disconnected(network_caused));
        }
        ObservableFuture::succeeded(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().current.is_some()
    }

    fn connected_events(&self) -> &Signal<ConnectionHandle> {
        &self.connected_events
    }

    fn disconnected_events(&self) -> &Signal<ConnectionHandle> {
        &self.disconnected_events
    }
}

impl<O, I> Connection for MockConnection<O, I>
where
    O: Send + 'static,
    I: Send + Sync + 'static,
{
    type Outbound = O;
    type Inbound = I;

    fn send(&self, message: O) -> ObservableFuture<bool> {
        let mut state = self.state.lock();
        if state.current.is_none() {
            return ObservableFuture::failed(CoreError::new(
                codes::TRANSPORT_DISCONNECTED,
                "mock connection is not connected",
            ));
        }
        state.sent.push(message);
        match state.send_script.pop_front().unwrap_or(SendStep::Deliver(true)) {
            SendStep::Deliver(written) => ObservableFuture::succeeded(written),
            SendStep::Fail(err) => ObservableFuture::failed(err),
            SendStep::Cancel => ObservableFuture::cancelled(),
            SendStep::Hold => {
                let held = ObservableFuture::pending();
                state.held_sends.push(held.clone());
                held
            }
        }
    }

    fn inbound_events(&self) -> &Signal<I> {
        &self.inbound
    }
}
