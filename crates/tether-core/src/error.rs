//! 错误域：稳定错误码 + 人类可读消息 + 可选底层原因。
//!
//! # 设计背景（Why）
//! - 可靠性层内的故障（断线、发送失败、请求过期、帧解析失败）最终都要落到某个
//!   [`ObservableFuture`](crate::future::ObservableFuture) 上，被多个观察者同时读取；
//!   因此错误必须可 `Clone`、可跨线程移动，并携带机读的稳定错误码。
//! - 错误码采用 `<域>.<语义>` 命名，分类（[`ErrorCategory`]）由域前缀推导，调用方无需解析消息文本。
//!
//! # 契约说明（What）
//! - [`codes`] 中列出的码值是稳定契约，新增码值需要同步更新 [`CoreError::category`] 的映射；
//! - `cause` 以 `Arc` 共享，克隆错误不会复制底层原因。

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// 稳定错误码集合。
pub mod codes {
    /// 连接在请求完成前断开。
    pub const TRANSPORT_DISCONNECTED: &str = "transport.disconnected";
    /// 传输层报告帧未能写出。
    pub const TRANSPORT_SEND_FAILED: &str = "transport.send_failed";
    /// 建立物理连接失败。
    pub const TRANSPORT_CONNECT_FAILED: &str = "transport.connect_failed";
    /// 帧格式或载荷无法解析。
    pub const PROTOCOL_DECODE: &str = "protocol.decode";
    /// 出站命令无法序列化。
    pub const PROTOCOL_ENCODE: &str = "protocol.encode";
    /// 连接握手载荷非法。
    pub const PROTOCOL_HANDSHAKE: &str = "protocol.handshake";
    /// 单帧长度超过预算。
    pub const PROTOCOL_BUDGET_EXCEEDED: &str = "protocol.budget_exceeded";
    /// 重要请求超过过期时间仍未完成。
    pub const REQUEST_TIMEOUT: &str = "request.timeout";
    /// 请求被显式取消。
    pub const REQUEST_CANCELLED: &str = "request.cancelled";
    /// 请求任务在启动阶段同步失败。
    pub const REQUEST_TASK_FAILED: &str = "request.task_failed";
    /// 调用方传入了违反契约的参数。
    pub const CONTRACT_INVALID_ARGUMENT: &str = "contract.invalid_argument";
    /// 同一请求 ID 被用于不同结果类型。
    pub const CONTRACT_TYPE_MISMATCH: &str = "contract.type_mismatch";
    /// 所属组件已关闭。
    pub const RUNTIME_SHUTDOWN: &str = "runtime.shutdown";
    /// 后台线程启动失败。
    pub const RUNTIME_SPAWN_FAILED: &str = "runtime.spawn_failed";
}

/// 共享的底层原因。
pub type ErrorCause = Arc<dyn StdError + Send + Sync + 'static>;

/// 统一返回值别名，默认错误类型为 [`CoreError`]。
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// 错误分类，驱动上层的处置策略。
///
/// - `Transport`：可通过重连恢复；
/// - `Protocol`：按帧丢弃，不影响连接；
/// - `Timeout`：请求级过期，与取消严格区分；
/// - `Contract`：调用方编程错误，应在调用点立即暴露。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    Transport,
    Protocol,
    Timeout,
    Cancelled,
    Contract,
    Runtime,
}

/// `CoreError` 是可靠性层所有失败路径的最终形态。
///
/// # 契约说明（What）
/// - `code`：稳定错误码，来自 [`codes`] 或遵循 `<域>.<语义>` 的自定义值；
/// - `message`：面向排障人员的描述，不应包含敏感信息；
/// - `cause`：可选底层原因，经 [`std::error::Error::source`] 暴露。
#[derive(Clone)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
}

impl CoreError {
    /// 构造核心错误。
    ///
    /// ```rust
    /// use tether_core::error::{codes, CoreError, ErrorCategory};
    ///
    /// let err = CoreError::new(codes::REQUEST_TIMEOUT, "subscribe expired");
    /// assert_eq!(err.code(), codes::REQUEST_TIMEOUT);
    /// assert_eq!(err.category(), ErrorCategory::Timeout);
    /// assert!(err.cause().is_none());
    /// ```
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因并返回新的错误。
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 附带已共享的底层原因。
    pub fn with_shared_cause(mut self, cause: ErrorCause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 错误描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 由错误码的域前缀推导分类；未知域归入 `Runtime`。
    pub fn category(&self) -> ErrorCategory {
        match self.code {
            codes::REQUEST_TIMEOUT => ErrorCategory::Timeout,
            codes::REQUEST_CANCELLED => ErrorCategory::Cancelled,
            code if code.starts_with("transport.") => ErrorCategory::Transport,
            code if code.starts_with("protocol.") => ErrorCategory::Protocol,
            code if code.starts_with("contract.") => ErrorCategory::Contract,
            _ => ErrorCategory::Runtime,
        }
    }

    /// 是否为请求过期错误。
    pub fn is_timeout(&self) -> bool {
        self.category() == ErrorCategory::Timeout
    }

    pub(crate) fn timeout(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::REQUEST_TIMEOUT, message)
    }

    pub(crate) fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::CONTRACT_INVALID_ARGUMENT, message)
    }
}

impl fmt::Debug for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("CoreError");
        debug.field("code", &self.code).field("message", &self.message);
        if let Some(cause) = &self.cause {
            debug.field("cause", &format_args!("{cause}"));
        }
        debug.finish()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl StdError for CoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Refused;

    impl fmt::Display for Refused {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("connection refused")
        }
    }

    impl StdError for Refused {}

    #[test]
    fn category_follows_code_namespace() {
        let cases = [
            (codes::TRANSPORT_DISCONNECTED, ErrorCategory::Transport),
            (codes::PROTOCOL_DECODE, ErrorCategory::Protocol),
            (codes::REQUEST_TIMEOUT, ErrorCategory::Timeout),
            (codes::REQUEST_CANCELLED, ErrorCategory::Cancelled),
            (codes::CONTRACT_TYPE_MISMATCH, ErrorCategory::Contract),
            (codes::RUNTIME_SHUTDOWN, ErrorCategory::Runtime),
        ];
        for (code, expected) in cases {
            assert_eq!(CoreError::new(code, "x").category(), expected, "{code}");
        }
    }

    #[test]
    fn clone_shares_cause_and_exposes_source() {
        let err = CoreError::new(codes::TRANSPORT_CONNECT_FAILED, "dial failed").with_cause(Refused);
        let copy = err.clone();
        assert_eq!(copy.to_string(), "[transport.connect_failed] dial failed");
        let source = copy.source().expect("cause must be exposed as source");
        assert_eq!(source.to_string(), "connection refused");
        assert!(Arc::ptr_eq(
            err.cause().expect("cause"),
            copy.cause().expect("cause")
        ));
    }
}
