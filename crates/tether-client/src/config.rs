//! 客户端配置：从 TOML 加载，全部字段带默认值。
//!
//! ```toml
//! [reconnect]
//! strategy = "exponential"   # 或 "fixed"
//! unit = "millis"            # micros | millis | seconds
//! delay = 5000               # fixed 策略的间隔
//! initial = 1000             # exponential 策略的初始等待
//! multiplier = 2.0
//! max = 60000                # 可选上限
//!
//! [requests]
//! connect_ttl_ms = 30000
//! subscribe_ttl_ms = 30000
//!
//! [sequence]
//! floor = 1
//!
//! [codec]
//! max_frame_size = 65536     # 省略表示不限制
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tether_codec_frame::FrameCodec;
use tether_core::backoff::{BackoffPolicy, ExponentialBackoff, FixedBackoff, TimeUnit};
use tether_core::error::CoreError;
use thiserror::Error;

/// 配置加载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败。
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML 语法或字段类型错误。
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// 字段取值不合法。
    #[error("invalid `{field}`: {source}")]
    Invalid {
        field: &'static str,
        #[source]
        source: CoreError,
    },
}

/// 重连退避的形状。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    #[default]
    Exponential,
}

/// `[reconnect]` 段。
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    pub strategy: BackoffStrategy,
    pub unit: TimeUnit,
    pub delay: u64,
    pub initial: u64,
    pub multiplier: f64,
    pub max: Option<u64>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            unit: TimeUnit::Millis,
            delay: 5_000,
            initial: 1_000,
            multiplier: ExponentialBackoff::DEFAULT_MULTIPLIER,
            max: None,
        }
    }
}

/// `[requests]` 段：重要请求的存活时长。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestConfig {
    pub connect_ttl_ms: u64,
    pub subscribe_ttl_ms: u64,
}

impl RequestConfig {
    pub fn connect_ttl(&self) -> Duration {
        Duration::from_millis(self.connect_ttl_ms)
    }

    pub fn subscribe_ttl(&self) -> Duration {
        Duration::from_millis(self.subscribe_ttl_ms)
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            connect_ttl_ms: 30_000,
            subscribe_ttl_ms: 30_000,
        }
    }
}

/// `[sequence]` 段。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SequenceConfig {
    /// 各流的起始序号。
    pub floor: u64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            floor: tether_core::sequence::DEFAULT_FLOOR,
        }
    }
}

/// `[codec]` 段。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecConfig {
    pub max_frame_size: Option<usize>,
}

/// 客户端完整配置。
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub reconnect: ReconnectConfig,
    pub requests: RequestConfig,
    pub sequence: SequenceConfig,
    pub codec: CodecConfig,
}

impl ClientConfig {
    /// 解析 TOML 文本并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 读取并解析配置文件。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 校验跨字段约束；退避参数的合法性以能否构造出策略为准。
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backoff_policy().map(|_| ())?;
        if self.codec.max_frame_size == Some(0) {
            return Err(ConfigError::Invalid {
                field: "codec.max_frame_size",
                source: CoreError::new(
                    tether_core::codes::CONTRACT_INVALID_ARGUMENT,
                    "frame budget must be positive",
                ),
            });
        }
        Ok(())
    }

    /// 按 `[reconnect]` 段构造退避策略。
    pub fn backoff_policy(&self) -> Result<Arc<dyn BackoffPolicy>, ConfigError> {
        let reconnect = &self.reconnect;
        match reconnect.strategy {
            BackoffStrategy::Fixed => Ok(Arc::new(FixedBackoff::new(
                reconnect.unit.duration(reconnect.delay),
            ))),
            BackoffStrategy::Exponential => {
                let mut policy =
                    ExponentialBackoff::new(reconnect.initial, reconnect.multiplier, reconnect.unit)
                        .map_err(|source| ConfigError::Invalid {
                            field: "reconnect.multiplier",
                            source,
                        })?;
                if let Some(max) = reconnect.max {
                    policy = policy.with_max(reconnect.unit.duration(max));
                }
                Ok(Arc::new(policy))
            }
        }
    }

    /// 按 `[codec]` 段构造编解码器。
    pub fn frame_codec(&self) -> FrameCodec {
        match self.codec.max_frame_size {
            Some(limit) => FrameCodec::with_max_frame_size(limit),
            None => FrameCodec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ClientConfig::from_toml_str("").expect("defaults");
        assert_eq!(config, ClientConfig::default());
        let policy = config.backoff_policy().expect("policy");
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(config.requests.connect_ttl(), Duration::from_secs(30));
        assert_eq!(config.frame_codec(), FrameCodec::new());
    }

    #[test]
    fn fixed_strategy_in_seconds() {
        let config = ClientConfig::from_toml_str(
            r#"
            [reconnect]
            strategy = "fixed"
            unit = "seconds"
            delay = 3

            [codec]
            max_frame_size = 4096
            "#,
        )
        .expect("valid");
        let policy = config.backoff_policy().expect("policy");
        assert_eq!(policy.delay(1), Duration::from_secs(3));
        assert_eq!(policy.delay(9), Duration::from_secs(3));
        assert_eq!(config.frame_codec().max_frame_size(), Some(4096));
    }

    #[test]
    fn exponential_cap_is_applied() {
        let config = ClientConfig::from_toml_str(
            r#"
            [reconnect]
            initial = 200
            multiplier = 3.0
            max = 1000
            "#,
        )
        .expect("valid");
        let policy = config.backoff_policy().expect("policy");
        assert_eq!(policy.delay(2), Duration::from_millis(600));
        assert_eq!(policy.delay(3), Duration::from_millis(1_000));
    }

    #[test]
    fn shrinking_multiplier_is_invalid() {
        let err = ClientConfig::from_toml_str("[reconnect]\nmultiplier = 0.5\n")
            .expect_err("must reject");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "reconnect.multiplier",
                ..
            }
        ));
    }

    #[test]
    fn unknown_keys_and_bad_types_are_parse_errors() {
        assert!(matches!(
            ClientConfig::from_toml_str("[reconnect]\njitter = true\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ClientConfig::from_toml_str("[reconnect]\nstrategy = \"linear\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn zero_frame_budget_is_invalid() {
        let err = ClientConfig::from_toml_str("[codec]\nmax_frame_size = 0\n").expect_err("reject");
        assert!(err.to_string().contains("codec.max_frame_size"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ClientConfig::load("/nonexistent/tether.toml").expect_err("missing");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
