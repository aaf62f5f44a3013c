//! 重连退避策略：尝试序号 → 等待时长的纯函数。
//!
//! # 契约说明（What）
//! - `attempt` 从 1 开始计数，传入 0 按 1 处理；
//! - 任意实现都必须对 `attempt` 单调不减：上限可以让曲线进入平台期，但绝不能回落。

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoreError, Result};

/// 退避策略。
pub trait BackoffPolicy: Send + Sync + fmt::Debug + 'static {
    /// 第 `attempt` 次重连前的等待时长。
    fn delay(&self, attempt: u32) -> Duration;
}

/// 固定间隔退避，忽略尝试序号。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    /// 默认间隔 5 秒。
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(5_000);

    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DELAY)
    }
}

impl BackoffPolicy for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// 配置中表达时长数值所用的单位。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Micros,
    #[default]
    Millis,
    Seconds,
}

impl TimeUnit {
    /// 把 `value` 个单位换算为 [`Duration`]。
    pub fn duration(self, value: u64) -> Duration {
        match self {
            TimeUnit::Micros => Duration::from_micros(value),
            TimeUnit::Millis => Duration::from_millis(value),
            TimeUnit::Seconds => Duration::from_secs(value),
        }
    }
}

/// 指数退避：`initial * multiplier^(attempt - 1)`，可选上限。
///
/// # 教案式说明
/// - **契约 (What)**：`multiplier >= 1.0` 且为有限值，否则构造失败；这是单调不减的充分条件；
/// - **实现 (How)**：以秒为单位做浮点运算，结果溢出 `Duration` 或超过上限时饱和到上限
///   （无上限时饱和到 `Duration::MAX`），因此曲线只会进入平台期；
/// - **默认值**：初始 1000 毫秒，倍数 2.0，无上限。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: f64,
    max: Option<Duration>,
}

impl ExponentialBackoff {
    pub const DEFAULT_INITIAL: Duration = Duration::from_millis(1_000);
    pub const DEFAULT_MULTIPLIER: f64 = 2.0;

    /// 以 `initial` 个 `unit` 为初始等待构造策略。
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use tether_core::backoff::{BackoffPolicy, ExponentialBackoff, TimeUnit};
    ///
    /// let policy = ExponentialBackoff::new(500, 3.0, TimeUnit::Millis).unwrap();
    /// assert_eq!(policy.delay(1), Duration::from_millis(500));
    /// assert_eq!(policy.delay(3), Duration::from_millis(4_500));
    /// ```
    pub fn new(initial: u64, multiplier: f64, unit: TimeUnit) -> Result<Self> {
        Self::from_duration(unit.duration(initial), multiplier)
    }

    /// 以 [`Duration`] 形式的初始等待构造策略。
    pub fn from_duration(initial: Duration, multiplier: f64) -> Result<Self> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(CoreError::invalid_argument(format!(
                "exponential backoff multiplier must be a finite value >= 1.0, got {multiplier}"
            )));
        }
        Ok(Self {
            initial,
            multiplier,
            max: None,
        })
    }

    /// 设置等待上限。
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn max(&self) -> Option<Duration> {
        self.max
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Self::DEFAULT_INITIAL,
            multiplier: Self::DEFAULT_MULTIPLIER,
            max: None,
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.max.unwrap_or(Duration::MAX);
        let exponent = attempt.max(1) - 1;
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let raw = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        raw.min(ceiling)
    }
}
