use bytes::{BufMut, BytesMut};
use tether_core::error::{CoreError, Result, codes};

use crate::command::Command;
use crate::frame::{Frame, FrameKind};

const SEPARATOR: char = ':';
const NEWLINE: char = '\n';
const FIELD_COUNT: usize = 4;

/// 解码结果：帧本身，以及 JSON 消息帧解析出的命令。
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    frame: Frame,
    command: Option<Command>,
}

impl DecodedFrame {
    /// 帧。
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// 结构化命令；非 JSON 消息帧或载荷无法解析时为 `None`。
    pub fn command(&self) -> Option<&Command> {
        self.command.as_ref()
    }

    /// 拆解为帧与命令。
    pub fn into_parts(self) -> (Frame, Option<Command>) {
        (self.frame, self.command)
    }
}

/// 冒号分隔、类型前缀的行帧编解码器。
///
/// # 设计动机（Why）
/// - 传输层交换的每一行都是一帧，编解码必须与线上格式逐字节一致；
/// - 单帧 JSON 损坏不应拖垮整条连接，因此解码只在帧结构本身非法时报错。
///
/// # 行为概览（How）
/// - `encode`：校验字段后以 `:` 拼接四个字段，缺省客户端 ID 写为空串，追加换行；
/// - `decode`：最多切分为四段，首段必须是单个已知类型字符，缺失的尾部字段按空串处理；
///   JSON 消息帧的载荷尝试解析为 [`Command`]，失败时记录告警并返回“无命令”。
///
/// # 契约说明（What）
/// - 序号与客户端 ID 不得包含 `:` 或换行，载荷不得包含换行、不得以 `\r` 结尾（解码时会被当作
///   `\r\n` 行尾剥离），否则返回 `contract.invalid_argument`；
/// - 配置了 `max_frame_size` 时，超出预算的帧返回 `protocol.budget_exceeded`；
/// - 编解码器无状态，可在多线程间共享。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame_size: Option<usize>,
}

impl FrameCodec {
    /// 创建不限制帧长的编解码器。
    pub const fn new() -> Self {
        Self {
            max_frame_size: None,
        }
    }

    /// 以单帧字节上限（不含换行）创建编解码器。
    pub const fn with_max_frame_size(limit: usize) -> Self {
        Self {
            max_frame_size: Some(limit),
        }
    }

    /// 单帧字节上限。
    pub const fn max_frame_size(&self) -> Option<usize> {
        self.max_frame_size
    }

    /// 将帧编码为带换行的一行文本。
    ///
    /// ```rust
    /// use tether_codec_frame::{Frame, FrameCodec, FrameKind};
    ///
    /// let frame = Frame::new(FrameKind::JsonMessage, "17", Some("42".into()), r#"{"type":"ping"}"#);
    /// let line = FrameCodec::new().encode(&frame).unwrap();
    /// assert_eq!(line, "4:17:42:{\"type\":\"ping\"}\n");
    /// ```
    pub fn encode(&self, frame: &Frame) -> Result<String> {
        self.encode_parts(frame.kind(), frame.id(), frame.client_id(), frame.payload())
    }

    /// 以离散字段编码。
    pub fn encode_parts(
        &self,
        kind: FrameKind,
        id: &str,
        client_id: Option<&str>,
        payload: &str,
    ) -> Result<String> {
        check_field("id", id, true)?;
        let client_id = client_id.unwrap_or_default();
        check_field("client id", client_id, true)?;
        check_field("payload", payload, false)?;
        if payload.ends_with('\r') {
            return Err(CoreError::new(
                codes::CONTRACT_INVALID_ARGUMENT,
                "frame payload must not end with a carriage return",
            ));
        }

        let len = 1 + id.len() + client_id.len() + payload.len() + (FIELD_COUNT - 1);
        self.check_budget(len, "encode")?;

        let mut line = String::with_capacity(len + 1);
        line.push(kind.as_char());
        line.push(SEPARATOR);
        line.push_str(id);
        line.push(SEPARATOR);
        line.push_str(client_id);
        line.push(SEPARATOR);
        line.push_str(payload);
        line.push(NEWLINE);
        Ok(line)
    }

    /// 把帧编码追加到字节缓冲。
    pub fn encode_into(&self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        let line = self.encode(frame)?;
        dst.reserve(line.len());
        dst.put_slice(line.as_bytes());
        Ok(())
    }

    /// 以命令构造 JSON 消息帧并编码。
    pub fn encode_command(
        &self,
        id: &str,
        client_id: Option<&str>,
        command: &Command,
    ) -> Result<String> {
        let payload = command.to_json()?;
        self.encode_parts(FrameKind::JsonMessage, id, client_id, &payload)
    }

    /// 解码一行；行尾的 `\n` 或 `\r\n` 会被忽略。
    pub fn decode(&self, line: &str) -> Result<DecodedFrame> {
        let line = line
            .strip_suffix(NEWLINE)
            .map(|rest| rest.strip_suffix('\r').unwrap_or(rest))
            .unwrap_or(line);
        self.check_budget(line.len(), "decode")?;

        let mut fields = line.splitn(FIELD_COUNT, SEPARATOR);
        let type_field = fields.next().unwrap_or_default();
        let mut chars = type_field.chars();
        let kind = match (chars.next(), chars.next()) {
            (Some(ch), None) => FrameKind::from_char(ch),
            _ => None,
        }
        .ok_or_else(|| {
            CoreError::new(
                codes::PROTOCOL_DECODE,
                format!("unknown frame type `{type_field}`"),
            )
        })?;
        let id = fields.next().unwrap_or_default();
        let client_id = fields.next().unwrap_or_default();
        let payload = fields.next().unwrap_or_default();

        let command = if kind == FrameKind::JsonMessage {
            match Command::from_json(payload) {
                Ok(command) => Some(command),
                Err(err) => {
                    tracing::warn!(frame_id = id, code = err.code(), "dropping malformed json message");
                    None
                }
            }
        } else {
            None
        };

        Ok(DecodedFrame {
            frame: Frame::new(kind, id, Some(client_id.to_owned()), payload),
            command,
        })
    }

    fn check_budget(&self, len: usize, stage: &str) -> Result<()> {
        match self.max_frame_size {
            Some(limit) if len > limit => Err(CoreError::new(
                codes::PROTOCOL_BUDGET_EXCEEDED,
                format!("frame length {len} exceeds {stage} budget {limit}"),
            )),
            _ => Ok(()),
        }
    }
}

fn check_field(name: &str, value: &str, forbid_separator: bool) -> Result<()> {
    let illegal = value.contains(NEWLINE) || (forbid_separator && value.contains(SEPARATOR));
    if illegal {
        return Err(CoreError::new(
            codes::CONTRACT_INVALID_ARGUMENT,
            format!("frame {name} contains a reserved character: {value:?}"),
        ));
    }
    Ok(())
}
