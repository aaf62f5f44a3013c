//! 重要请求的值对象。

use std::time::{Duration, Instant};

use serde_json::Value;

/// 幂等、可去重、会过期的请求描述。
///
/// `request_id` 是去重键，调用方应从会话与客户端标识派生，保证逻辑相同的请求得到相同的 ID。
/// 创建后不可变。
#[derive(Clone, Debug, PartialEq)]
pub struct ImportantRequest {
    request_id: String,
    request_type: String,
    parameters: Value,
    created_at: Instant,
    expires_at: Instant,
}

impl ImportantRequest {
    /// 以存活时长 `ttl` 创建请求，`now` 应来自执行该请求的调度器。
    pub fn new(
        request_id: impl Into<String>,
        request_type: impl Into<String>,
        parameters: Value,
        now: Instant,
        ttl: Duration,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            request_type: request_type.into(),
            parameters,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// 选择执行该请求的 worker。
    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// 相对 `now` 的剩余存活时长。
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}
