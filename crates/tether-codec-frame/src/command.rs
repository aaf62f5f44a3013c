use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tether_core::error::{CoreError, Result, codes};

/// JSON 消息帧承载的结构化命令。
///
/// # 契约说明（What）
/// - `type` 字段必填，决定命令语义（例如 `subscribe`、`presence`）；
/// - `channel` 与 `sequence` 可选：同时存在时命令属于某个有序流，序号用于缺口追踪；
/// - 其余字段原样保留在 [`Command::fields`] 中，应用层按需读取。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence: Option<u64>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Command {
    /// 以命令类型构造空命令。
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            channel: None,
            sequence: None,
            fields: Map::new(),
        }
    }

    /// 设置频道。
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// 设置序号。
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// 附加任意字段；与保留字段同名时忽略。
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !matches!(key.as_str(), "type" | "channel" | "sequence") {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// 命令类型。
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// 所属频道。
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// 流内序号。
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// 读取附加字段。
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// 附加字段的字符串值。
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    /// 全部附加字段。
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// 缺口追踪使用的流键：有序命令的 `(频道, 序号)`。
    pub fn stream_position(&self) -> Option<(&str, u64)> {
        Some((self.channel.as_deref()?, self.sequence?))
    }

    /// 从 JSON 文本解析。
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| {
            CoreError::new(codes::PROTOCOL_DECODE, "json message is not a valid command")
                .with_cause(err)
        })
    }

    /// 序列化为 JSON 文本。
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|err| {
            CoreError::new(codes::PROTOCOL_ENCODE, "command cannot be serialized")
                .with_cause(err)
        })
    }
}
