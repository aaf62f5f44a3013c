//! 进程级日志装配。
//!
//! # 教案式说明
//! - **意图（Why）**：可靠性层各组件只通过 `tracing` 宏输出结构化字段（`request_id`、`attempt`、`stream` 等），
//!   宿主需要一个一次性、可失败的入口把它们接到标准输出；
//! - **逻辑（How）**：`registry + EnvFilter + fmt::layer` 组合后设置为全局默认 Subscriber，安装成功后写入
//!   进程级 `OnceLock`，重复调用直接返回 [`TelemetryError::AlreadyInstalled`]；
//! - **契约（What）**：显式传入的过滤表达式优先；否则读取 `RUST_LOG`，缺省为 `info`。
//!   外部已设置全局 Subscriber 时不做覆盖。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, filter::ParseError, layer::SubscriberExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 日志安装过程可能出现的错误。
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// [`install`] 已成功执行过。
    #[error("telemetry is already installed")]
    AlreadyInstalled,
    /// 外部提前设置了全局 `tracing` Subscriber。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    /// 过滤表达式无法解析。
    #[error("invalid log filter `{directive}`: {source}")]
    InvalidFilter {
        directive: String,
        #[source]
        source: ParseError,
    },
    /// 设置全局 Subscriber 失败。
    #[error("failed to set global subscriber: {0}")]
    SetGlobalSubscriber(#[from] dispatcher::SetGlobalDefaultError),
}

/// 安装 `fmt + EnvFilter` 全局 Subscriber。
pub fn install(filter: Option<&str>) -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Err(TelemetryError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter(filter)?)
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;

    INSTALLED
        .set(())
        .map_err(|_| TelemetryError::AlreadyInstalled)
}

/// 是否已由 [`install`] 完成安装。
pub fn is_installed() -> bool {
    INSTALLED.get().is_some()
}

fn build_env_filter(filter: Option<&str>) -> Result<EnvFilter, TelemetryError> {
    match filter {
        Some(directive) => {
            EnvFilter::try_new(directive).map_err(|source| TelemetryError::InvalidFilter {
                directive: directive.to_owned(),
                source,
            })
        }
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}
