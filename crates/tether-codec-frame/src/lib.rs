#![deny(unsafe_code)]
#![warn(missing_docs)]

//! `tether-codec-frame` 实现长连接客户端与服务端之间的行帧编解码。
//!
//! # 背景（Why）
//! - 传输层逐行交换形如 `<类型>:<序号>:<客户端 ID>:<载荷>` 的帧，可靠性层需要从中取出
//!   结构化命令（用于请求响应匹配与序号缺口追踪）与握手参数；
//! - 单帧损坏（未知类型、非法 JSON、超长行）只影响该帧，不应终止整条连接。
//!
//! # 使用概览（How）
//! - [`FrameCodec`]：单行编解码，JSON 消息帧附带解析出的 [`Command`]；
//! - [`FrameDecoder`]：基于 `bytes::BytesMut` 的增量分帧，带单帧预算；
//! - [`Handshake`]：连接握手载荷解析，[`numeric_client_id`] 在非数字输入上返回 `None`。
//!
//! # 合约说明（What）
//! - 错误统一使用 `tether_core::CoreError`：帧结构非法为 `protocol.decode`，超长为
//!   `protocol.budget_exceeded`，握手非法为 `protocol.handshake`，编码参数非法为 `contract.invalid_argument`。

mod codec;
mod command;
mod decoder;
mod frame;
mod handshake;

pub use crate::codec::{DecodedFrame, FrameCodec};
pub use crate::command::Command;
pub use crate::decoder::FrameDecoder;
pub use crate::frame::{Frame, FrameKind};
pub use crate::handshake::{Handshake, numeric_client_id};
