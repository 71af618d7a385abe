//! 退避等待原语
//!
//! 抽象出等待，便于测试在不真正休眠的情况下跑完整个超时路径。

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// 等待被异常打断
#[derive(Debug, Error)]
#[error("退避等待被中断: {0}")]
pub struct SleepError(pub String);

/// 退避等待
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration) -> Result<(), SleepError>;
}

/// 基于 tokio 定时器的真实等待
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) -> Result<(), SleepError> {
        tokio::time::sleep(duration).await;
        Ok(())
    }
}
