//! 连接协作方的接口边界。
//!
//! 可靠性层不实现传输，只通过本模块的 trait 与之交互：发起连接/断开、发送帧、
//! 以及在连接、断开、入站命令三类事件上登记观察者。传输实现负责按到达顺序在各自的
//! [`Signal`] 上分发事件。

use std::sync::atomic::{AtomicU64, Ordering};

use crate::future::ObservableFuture;
use crate::signal::Signal;

/// 一次物理连接尝试的身份与断开原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    id: u64,
    disconnected_via_network: bool,
    destroyed: bool,
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionHandle {
    /// 分配新的连接身份。
    pub fn next() -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            disconnected_via_network: false,
            destroyed: false,
        }
    }

    /// 同一连接身份在断开后的快照。
    pub fn disconnected(self, via_network: bool) -> Self {
        Self {
            disconnected_via_network: via_network,
            destroyed: true,
            ..self
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// 断开是否由网络故障（而非本地主动停止）引起。
    pub fn disconnected_via_network(&self) -> bool {
        self.disconnected_via_network
    }

    /// 该连接是否已销毁。
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

/// 连接的生命周期面：重连控制器只依赖这一部分，因此保持对象安全。
pub trait ConnectionLifecycle: Send + Sync + 'static {
    /// 发起连接，成功时给出新的连接身份。
    fn connect(&self) -> ObservableFuture<ConnectionHandle>;

    /// 断开连接；`network_caused` 为 `true` 时断开事件会被视为网络故障。
    fn disconnect(&self, network_caused: bool) -> ObservableFuture<()>;

    /// 当前是否已连接。
    fn is_connected(&self) -> bool;

    /// 连接建立事件。
    fn connected_events(&self) -> &Signal<ConnectionHandle>;

    /// 连接断开事件。
    fn disconnected_events(&self) -> &Signal<ConnectionHandle>;
}

/// 完整的连接面：在生命周期之上增加收发。
pub trait Connection: ConnectionLifecycle {
    /// 出站消息类型（例如一帧）。
    type Outbound: Send + 'static;
    /// 入站命令类型。
    type Inbound: Send + Sync + 'static;

    /// 发送一条消息；`true` 表示已写出。
    fn send(&self, message: Self::Outbound) -> ObservableFuture<bool>;

    /// 入站命令事件。
    fn inbound_events(&self) -> &Signal<Self::Inbound>;
}
