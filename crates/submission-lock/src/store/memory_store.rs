//! 进程内锁存储
//!
//! 单持有者语义，锁在 `expiration_timeout` 后可被他人抢占。
//! 时间取自 tokio 定时器，测试中可以用暂停时钟推进过期。

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::debug;

use super::LockStore;
use crate::error::Result;
use crate::lock_type::LockType;

#[derive(Debug, Clone)]
struct Holder {
    lock_id: String,
    expires_at: Instant,
}

impl Holder {
    fn new(lock_id: &str, lock_type: &LockType) -> Self {
        Self {
            lock_id: lock_id.to_string(),
            expires_at: Instant::now() + lock_type.expiration_timeout(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// 进程内锁存储
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    slots: DashMap<String, Holder>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前持有者（已过期的视为无人持有）
    pub fn holder(&self, resource_key: &str) -> Option<String> {
        let now = Instant::now();
        self.slots
            .get(resource_key)
            .filter(|h| !h.is_expired(now))
            .map(|h| h.lock_id.clone())
    }

    /// 当前未过期的锁数量
    pub fn active_locks(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|h| !h.is_expired(now)).count()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(
        &self,
        lock_id: &str,
        resource_key: &str,
        lock_type: &LockType,
    ) -> Result<bool> {
        let now = Instant::now();
        // entry 持有分片写锁，检查与写入是原子的
        match self.slots.entry(resource_key.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired(now) {
                    debug!(
                        resource_key,
                        previous = %slot.get().lock_id,
                        "Taking over expired in-memory lock"
                    );
                    slot.insert(Holder::new(lock_id, lock_type));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Holder::new(lock_id, lock_type));
                Ok(true)
            }
        }
    }

    async fn try_release(
        &self,
        lock_id: &str,
        resource_key: &str,
        _lock_type: &LockType,
    ) -> Result<bool> {
        Ok(self
            .slots
            .remove_if(resource_key, |_, holder| holder.lock_id == lock_id)
            .is_some())
    }
}
