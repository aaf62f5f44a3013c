use std::fmt;

/// 帧类型，对应行首的单个类型字符。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// `0`：断开。
    Disconnect,
    /// `1`：连接（握手）。
    Connect,
    /// `2`：心跳。
    Heartbeat,
    /// `3`：纯文本消息。
    Message,
    /// `4`：JSON 消息，载荷为结构化命令。
    JsonMessage,
    /// `5`：事件。
    Event,
    /// `6`：确认。
    Ack,
    /// `7`：错误。
    Error,
    /// `8`：空操作。
    Noop,
}

impl FrameKind {
    /// 全部帧类型，按类型字符升序排列。
    pub const ALL: [FrameKind; 9] = [
        FrameKind::Disconnect,
        FrameKind::Connect,
        FrameKind::Heartbeat,
        FrameKind::Message,
        FrameKind::JsonMessage,
        FrameKind::Event,
        FrameKind::Ack,
        FrameKind::Error,
        FrameKind::Noop,
    ];

    /// 线上类型字符。
    pub const fn as_char(self) -> char {
        match self {
            FrameKind::Disconnect => '0',
            FrameKind::Connect => '1',
            FrameKind::Heartbeat => '2',
            FrameKind::Message => '3',
            FrameKind::JsonMessage => '4',
            FrameKind::Event => '5',
            FrameKind::Ack => '6',
            FrameKind::Error => '7',
            FrameKind::Noop => '8',
        }
    }

    /// 由类型字符识别帧类型。
    pub const fn from_char(ch: char) -> Option<Self> {
        match ch {
            '0' => Some(FrameKind::Disconnect),
            '1' => Some(FrameKind::Connect),
            '2' => Some(FrameKind::Heartbeat),
            '3' => Some(FrameKind::Message),
            '4' => Some(FrameKind::JsonMessage),
            '5' => Some(FrameKind::Event),
            '6' => Some(FrameKind::Ack),
            '7' => Some(FrameKind::Error),
            '8' => Some(FrameKind::Noop),
            _ => None,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// 一帧：`<类型>:<序号>:<客户端 ID 或空>:<载荷>`。
///
/// 载荷位于最后一个字段，可以包含 `:`；序号与客户端 ID 不可以。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    id: String,
    client_id: Option<String>,
    payload: String,
}

impl Frame {
    /// 构造帧；空字符串形式的客户端 ID 视为缺省。
    pub fn new(
        kind: FrameKind,
        id: impl Into<String>,
        client_id: Option<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            client_id: client_id.filter(|value| !value.is_empty()),
            payload: payload.into(),
        }
    }

    /// 心跳帧 `2::`。
    pub fn heartbeat() -> Self {
        Self::new(FrameKind::Heartbeat, "", None, "")
    }

    /// 帧类型。
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// 序号字段，可能为空。
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 客户端 ID。
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// 载荷。
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// 拆解为 `(类型, 序号, 客户端 ID, 载荷)`。
    pub fn into_parts(self) -> (FrameKind, String, Option<String>, String) {
        (self.kind, self.id, self.client_id, self.payload)
    }
}
