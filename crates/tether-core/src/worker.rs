//! 请求竞速：发送一条请求，等待相关响应、连接断开或发送失败三者之一。
//!
//! # 设计背景（Why）
//! 连接、订阅等重要请求的执行方式完全一致，只有请求内容与“哪条入站命令算作响应”不同，
//! 因此抽象为一个以匹配函数参数化的通用原语。
//!
//! # 执行逻辑（How）
//! 1. 在入站事件上登记响应观察者，匹配函数返回 `Some` 即以该值完成；
//! 2. 在断开事件上登记一次性观察者，触发即以 `transport.disconnected` 失败；
//! 3. 发送请求：写出失败以 `transport.send_failed` 失败，发送被取消则以取消定论；
//! 4. 结果定论后立即注销两个观察者。注销幂等，与已经触发的一次性观察者不冲突。
//!
//! # 契约说明（What）
//! - 三条路径可能在不同线程上同时到达，结果单元的 CAS 保证只有第一条生效；
//! - 发送前连接已断开时，直接以 `transport.disconnected` 失败，不发送。

use std::fmt;
use std::sync::Arc;

use crate::connection::Connection;
use crate::error::{CoreError, codes};
use crate::future::{ObservableFuture, Outcome};

/// 基于共享连接的通用请求执行器。
pub struct RequestWorker<C> {
    connection: Arc<C>,
}

impl<C> Clone for RequestWorker<C> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
        }
    }
}

impl<C> fmt::Debug for RequestWorker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestWorker").finish_non_exhaustive()
    }
}

impl<C: Connection> RequestWorker<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// 发送 `message`，以第一条被 `matcher` 接受的入站命令完成。
    pub fn execute<R, M>(&self, message: C::Outbound, matcher: M) -> ObservableFuture<R>
    where
        R: Send + Sync + 'static,
        M: Fn(&C::Inbound) -> Option<R> + Send + Sync + 'static,
    {
        if !self.connection.is_connected() {
            return ObservableFuture::failed(CoreError::new(
                codes::TRANSPORT_DISCONNECTED,
                "connection is not established",
            ));
        }

        let result = ObservableFuture::<R>::pending();

        let response = {
            let target = result.clone();
            self.connection.inbound_events().subscribe(move |inbound| {
                if let Some(value) = matcher(inbound) {
                    target.complete(value);
                }
            })
        };
        let disconnect = {
            let target = result.clone();
            self.connection
                .disconnected_events()
                .subscribe_once(move |handle| {
                    if target.fail(CoreError::new(
                        codes::TRANSPORT_DISCONNECTED,
                        format!("connection {} closed before a response arrived", handle.id()),
                    )) {
                        tracing::debug!(connection = handle.id(), "request aborted by disconnect");
                    }
                })
        };
        result.on_settle(move |_| {
            response.unregister();
            disconnect.unregister();
        });

        let target = result.clone();
        self.connection.send(message).on_settle(move |outcome| {
            match outcome {
                Outcome::Succeeded(true) => {}
                Outcome::Succeeded(false) => {
                    target.fail(CoreError::new(
                        codes::TRANSPORT_SEND_FAILED,
                        "transport refused to write the request",
                    ));
                }
                Outcome::Failed(err) => {
                    target.fail(err.clone());
                }
                Outcome::Cancelled => {
                    target.cancel();
                }
            }
        });

        result
    }
}
