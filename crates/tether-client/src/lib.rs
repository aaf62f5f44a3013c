#![deny(unsafe_code)]

//! `tether-client` 把可靠性内核与行帧编解码装配为可直接使用的推送客户端。
//!
//! # 模块速览
//! - [`config`]：TOML 配置与退避策略构造；
//! - [`telemetry`]：一次性安装 `fmt + EnvFilter` 日志；
//! - [`pipeline`]：入站分帧、序号账本与缺口上报；
//! - [`requests`]：连接确认与订阅请求的构造和竞速执行；
//! - [`client`]：[`SignalClient`]，负责事件接线与订阅重放。

pub mod client;
pub mod config;
pub mod pipeline;
pub mod requests;
pub mod telemetry;

pub use client::{SignalClient, SubscriptionStatus};
pub use config::{ClientConfig, ConfigError};
pub use pipeline::{Delivery, GapReport, InboundPipeline};
pub use requests::SessionWorker;
pub use telemetry::TelemetryError;
