//! 锁类型
//!
//! 锁类型携带过期时间：持有者未能在该时间内释放时，存储必须自动回收该锁。

use std::time::Duration;

/// 锁类型描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockType {
    name: &'static str,
    expiration_timeout: Duration,
}

impl LockType {
    /// 提交修改锁
    ///
    /// 66 秒远大于单次 acquire 的最坏等待（3.75 秒），余量留给受保护的临界区。
    pub const MODIFICATION: LockType = LockType::new("MODIFICATION", Duration::from_secs(66));

    pub const fn new(name: &'static str, expiration_timeout: Duration) -> Self {
        Self {
            name,
            expiration_timeout,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 存储自动回收锁之前的最长持有时间
    pub fn expiration_timeout(&self) -> Duration {
        self.expiration_timeout
    }
}
