//! 重连退避
//!
//! 指数退避：3s → 6s → 12s → 24s → 30s 封顶，最多 5 次。
//! 连接成功后 `reset()` 恢复初始间隔并清零计数。

use std::time::Duration;
use tracing::info;

use crate::config::ReconnectConfig;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: ReconnectConfig,
    attempts: u32,
    delay_ms: u64,
}

impl ReconnectBackoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            attempts: 0,
            delay_ms: config.initial_delay_ms,
            config,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// 当前退避间隔（毫秒）
    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// 是否还允许重连
    pub fn can_retry(&self) -> bool {
        self.attempts < self.config.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        !self.can_retry()
    }

    /// 占用一次重连机会并返回本次需要等待的时间
    ///
    /// 次数耗尽时返回 None，状态不变。
    pub fn next_attempt(&mut self) -> Option<Duration> {
        if !self.can_retry() {
            return None;
        }

        self.attempts += 1;
        self.delay_ms = self
            .delay_ms
            .saturating_mul(self.config.backoff_multiplier)
            .min(self.config.max_delay_ms);

        info!(
            "重连尝试 #{}/{}, 等待 {}ms",
            self.attempts, self.config.max_attempts, self.delay_ms
        );
        Some(Duration::from_millis(self.delay_ms))
    }

    /// 连接成功后重置
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay_ms = self.config.initial_delay_ms;
    }

    /// 第 n 次重连之后的间隔：min(initial * multiplier^n, max)
    pub fn delay_after_attempt(config: &ReconnectConfig, attempt: u32) -> Duration {
        let factor = config.backoff_multiplier.saturating_pow(attempt);
        Duration::from_millis(
            config
                .initial_delay_ms
                .saturating_mul(factor)
                .min(config.max_delay_ms),
        )
    }
}
