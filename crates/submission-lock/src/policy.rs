//! 重试策略与退避
//!
//! 每次失败后在 `[0, current_max)` 内均匀随机等待，然后把 `current_max` 翻倍。
//! 随机抖动用于打散竞争者的重试节奏，不提供公平性。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use submission_shared::config::LockConfig;

use crate::error::{LockError, Result};

/// 每次 acquire/release 的默认尝试次数
pub const DEFAULT_TRIES: u32 = 4;

/// 默认初始退避上限
pub const DEFAULT_INITIAL_MAX_BACKOFF: Duration = Duration::from_millis(250);

/// 锁重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// 最大尝试次数（含首次）
    pub tries: u32,
    /// 首次失败后的退避上限
    pub initial_max_backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            tries: DEFAULT_TRIES,
            initial_max_backoff: DEFAULT_INITIAL_MAX_BACKOFF,
        }
    }
}

impl LockPolicy {
    pub fn new(tries: u32, initial_max_backoff: Duration) -> Result<Self> {
        if tries == 0 {
            return Err(LockError::invalid_argument(
                "tries",
                "lock policy needs at least one attempt",
            ));
        }
        Ok(Self {
            tries,
            initial_max_backoff,
        })
    }

    /// 设计上的最坏等待上界：每次尝试对应一个退避上限之和
    ///
    /// 默认策略为 250 + 500 + 1000 + 2000 = 3750ms。
    pub fn worst_case_wait(&self) -> Duration {
        (0..self.tries)
            .map(|i| {
                self.initial_max_backoff
                    .saturating_mul(2u32.saturating_pow(i))
            })
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl TryFrom<&LockConfig> for LockPolicy {
    type Error = LockError;

    fn try_from(config: &LockConfig) -> Result<Self> {
        Self::new(
            config.tries,
            Duration::from_millis(config.initial_max_backoff_ms),
        )
    }
}

/// 单个锁实例的退避状态
///
/// 每次 acquire/release 开始时 `reset`，不跨调用保留。
#[derive(Debug)]
pub struct Backoff {
    initial_max: Duration,
    current_max: Duration,
    rng: StdRng,
}

impl Backoff {
    pub fn new(initial_max: Duration) -> Self {
        Self::with_rng(initial_max, StdRng::from_os_rng())
    }

    pub fn with_rng(initial_max: Duration, rng: StdRng) -> Self {
        Self {
            initial_max,
            current_max: initial_max,
            rng,
        }
    }

    pub fn reset(&mut self) {
        self.current_max = self.initial_max;
    }

    /// 下一次等待的上限
    pub fn current_max(&self) -> Duration {
        self.current_max
    }

    /// 抽取下一次等待时长，并把上限翻倍
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_max.mul_f64(self.rng.random::<f64>());
        self.current_max = self.current_max.saturating_mul(2);
        delay
    }
}
