//! 会话级重要请求：连接确认与频道订阅。
//!
//! 两类请求共享同一套竞速原语（[`RequestWorker`]），只在命令内容与响应匹配上不同：
//! 出站命令携带 `requestId`，服务端以同类型、同 `requestId` 的命令应答。
//! 应答中出现 `error` 字段表示服务端拒绝，但仍算作“已应答”，由调用方决定如何处理。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tether_codec_frame::Command;
use tether_core::connection::Connection;
use tether_core::future::ObservableFuture;
use tether_core::request::ImportantRequest;
use tether_core::worker::RequestWorker;

/// 连接确认请求的类型。
pub const CONNECT: &str = "connect";
/// 订阅请求的类型。
pub const SUBSCRIBE: &str = "subscribe";
/// 取消订阅命令的类型。
pub const UNSUBSCRIBE: &str = "unsubscribe";

const REQUEST_ID_FIELD: &str = "requestId";
const ERROR_FIELD: &str = "error";

/// 由会话、客户端与请求键派生去重 ID；同一逻辑请求总是得到同一 ID。
pub fn request_id(session_id: &str, client_id: Option<&str>, request_type: &str, key: &str) -> String {
    format!(
        "{session_id}/{}/{request_type}/{key}",
        client_id.unwrap_or("-")
    )
}

/// 构造连接确认请求。
pub fn connect_request(
    session_id: &str,
    client_id: Option<&str>,
    now: Instant,
    ttl: Duration,
) -> ImportantRequest {
    ImportantRequest::new(
        request_id(session_id, client_id, CONNECT, session_id),
        CONNECT,
        json!({ "sessionId": session_id }),
        now,
        ttl,
    )
}

/// 构造频道订阅请求。
pub fn subscribe_request(
    session_id: &str,
    client_id: Option<&str>,
    channel: &str,
    now: Instant,
    ttl: Duration,
) -> ImportantRequest {
    ImportantRequest::new(
        request_id(session_id, client_id, SUBSCRIBE, channel),
        SUBSCRIBE,
        json!({ "channel": channel }),
        now,
        ttl,
    )
}

/// 把请求展开为出站命令：`type` 取请求类型，参数中的 `channel` 进入频道字段，其余原样附加。
pub fn command_for(request: &ImportantRequest) -> Command {
    let mut command = Command::new(request.request_type())
        .with_field(REQUEST_ID_FIELD, request.request_id());
    if let Value::Object(parameters) = request.parameters() {
        for (key, value) in parameters {
            command = match (key.as_str(), value) {
                ("channel", Value::String(channel)) => command.with_channel(channel.as_str()),
                _ => command.with_field(key.as_str(), value.clone()),
            };
        }
    }
    command
}

/// `reply` 是否是 `request` 的应答。
pub fn is_reply_to(request: &ImportantRequest, reply: &Command) -> bool {
    reply.kind() == request.request_type()
        && reply.str_field(REQUEST_ID_FIELD) == Some(request.request_id())
}

/// 应答中的拒绝原因。
pub fn rejection(reply: &Command) -> Option<&str> {
    reply.str_field(ERROR_FIELD)
}

/// 以命令收发的会话请求执行器。
pub struct SessionWorker<C> {
    worker: RequestWorker<C>,
}

impl<C> Clone for SessionWorker<C> {
    fn clone(&self) -> Self {
        Self {
            worker: self.worker.clone(),
        }
    }
}

impl<C> std::fmt::Debug for SessionWorker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWorker").finish_non_exhaustive()
    }
}

impl<C> SessionWorker<C>
where
    C: Connection<Outbound = Command, Inbound = Command>,
{
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            worker: RequestWorker::new(connection),
        }
    }

    /// 发送请求命令，以第一条匹配的应答完成。
    pub fn exchange(&self, request: &ImportantRequest) -> ObservableFuture<Command> {
        let command = command_for(request);
        let expected = request.clone();
        self.worker.execute(command, move |reply: &Command| {
            is_reply_to(&expected, reply).then(|| reply.clone())
        })
    }
}
