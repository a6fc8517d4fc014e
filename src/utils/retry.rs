use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::core::UploadError;

/// 限流（HTTP 429）处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitPolicy {
    /// 与 5xx 一样按退避重试
    #[default]
    Retry,
    /// 立即失败
    Fail,
}

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// 固定延迟
    Fixed(Duration),
    /// 指数退避
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    /// 第 `attempt` 次尝试失败后的等待时间（`attempt` 从 1 开始）
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential { initial, multiplier, max_delay } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= max_delay.as_secs_f64() {
                    *max_delay
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

/// 单个文件的重试配置
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大尝试次数（至少 1）
    pub max_attempts: u32,
    /// 退避策略
    pub strategy: RetryStrategy,
    /// 429 的处理方式
    pub rate_limit: RateLimitPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::Exponential {
                initial: Duration::from_secs(2),
                multiplier: 2.0,
                max_delay: Duration::from_secs(30),
            },
            rate_limit: RateLimitPolicy::Retry,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    pub fn exponential(mut self, initial: Duration, max_delay: Duration) -> Self {
        self.strategy = RetryStrategy::Exponential {
            initial,
            multiplier: 2.0,
            max_delay,
        };
        self
    }

    pub fn strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimitPolicy) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// 第 `attempt` 次失败后的退避时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.strategy.get_delay(attempt)
    }

    /// 第 `attempt` 次尝试以 `error` 失败后是否还应再试
    pub fn should_retry(&self, attempt: u32, error: &UploadError) -> bool {
        attempt < self.max_attempts.max(1) && error.is_retryable(self.rate_limit)
    }

    /// 前 `failures` 次失败累计的退避时间
    pub fn total_backoff(&self, failures: u32) -> Duration {
        (1..=failures).map(|attempt| self.backoff(attempt)).sum()
    }
}
