use std::time::Duration;

use tether_core::error::{CoreError, Result, codes};

/// 连接握手响应：`<clientId>:<heartbeatMs>:<disconnectMs>:<transport1,transport2,...>`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    client_id: String,
    heartbeat_interval: Duration,
    disconnect_timeout: Duration,
    transports: Vec<String>,
}

impl Handshake {
    /// 解析握手载荷。
    ///
    /// 心跳与断开超时允许为空（按零处理），传输列表忽略空项；其余格式问题返回 `protocol.handshake`。
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use tether_codec_frame::Handshake;
    ///
    /// let handshake = Handshake::parse("1234:60000:90000:websocket,xhr-polling").unwrap();
    /// assert_eq!(handshake.numeric_client_id(), Some(1234));
    /// assert_eq!(handshake.heartbeat_interval(), Duration::from_secs(60));
    /// assert_eq!(handshake.transports(), ["websocket", "xhr-polling"]);
    /// ```
    pub fn parse(payload: &str) -> Result<Self> {
        let mut fields = payload.trim_end().splitn(4, ':');
        let client_id = fields.next().unwrap_or_default();
        if client_id.is_empty() {
            return Err(invalid(payload, "missing client id"));
        }
        let heartbeat_interval = parse_millis(fields.next(), payload, "heartbeat")?;
        let disconnect_timeout = parse_millis(fields.next(), payload, "disconnect timeout")?;
        let transports = fields
            .next()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(Self {
            client_id: client_id.to_owned(),
            heartbeat_interval,
            disconnect_timeout,
            transports,
        })
    }

    /// 原始客户端 ID。
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// 数值形式的客户端 ID；非纯数字时为 `None`。
    pub fn numeric_client_id(&self) -> Option<u64> {
        numeric_client_id(&self.client_id)
    }

    /// 服务端期望的心跳间隔。
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// 服务端判定断开的超时。
    pub fn disconnect_timeout(&self) -> Duration {
        self.disconnect_timeout
    }

    /// 服务端支持的传输名称。
    pub fn transports(&self) -> &[String] {
        &self.transports
    }

    /// 是否支持指定传输。
    pub fn supports(&self, transport: &str) -> bool {
        self.transports.iter().any(|name| name == transport)
    }
}

/// 从握手载荷或单独的客户端 ID 字段提取数值 ID。
///
/// 只看第一个 `:` 之前的部分；为空、含非数字字符或溢出时返回 `None`，从不报错。
pub fn numeric_client_id(payload: &str) -> Option<u64> {
    let head = payload.split(':').next().unwrap_or_default().trim();
    if head.is_empty() || !head.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    head.parse().ok()
}

fn parse_millis(field: Option<&str>, payload: &str, name: &str) -> Result<Duration> {
    match field.map(str::trim) {
        None | Some("") => Ok(Duration::ZERO),
        Some(text) => text
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|err| invalid(payload, &format!("{name} is not a number")).with_cause(err)),
    }
}

fn invalid(payload: &str, reason: &str) -> CoreError {
    CoreError::new(
        codes::PROTOCOL_HANDSHAKE,
        format!("invalid handshake `{payload}`: {reason}"),
    )
}
