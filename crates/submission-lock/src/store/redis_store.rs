//! Redis 锁存储
//!
//! 认领使用 `SET key lock_id NX PX ttl`，过期由 Redis 自动处理；
//! 释放使用 Lua 脚本原子地校验持有者再删除，避免误删他人的锁。

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use submission_shared::cache::Cache;
use tracing::{debug, instrument};

use super::LockStore;
use crate::error::Result;
use crate::lock_type::LockType;

/// 只有当锁的持有者匹配时才删除
const RELEASE_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

const DEFAULT_KEY_PREFIX: &str = "lock:";

/// Redis 锁存储
#[derive(Clone)]
pub struct RedisLockStore {
    conn: MultiplexedConnection,
    key_prefix: String,
}

impl RedisLockStore {
    /// 建立多路复用连接并创建存储
    pub async fn connect(cache: &Cache) -> Result<Self> {
        let conn = cache.client().get_multiplexed_async_connection().await?;
        Ok(Self::new(conn))
    }

    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// 自定义 Redis key 前缀（多个环境共用一个 Redis 时使用）
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn redis_key(&self, resource_key: &str) -> String {
        redis_key(&self.key_prefix, resource_key)
    }
}

fn redis_key(prefix: &str, resource_key: &str) -> String {
    format!("{}{}", prefix, resource_key)
}

/// Redis PX 参数：毫秒，至少 1
fn ttl_millis(lock_type: &LockType) -> u64 {
    u64::try_from(lock_type.expiration_timeout().as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

#[async_trait]
impl LockStore for RedisLockStore {
    #[instrument(skip(self, lock_type), fields(lock_type = lock_type.name()))]
    async fn try_acquire(
        &self,
        lock_id: &str,
        resource_key: &str,
        lock_type: &LockType,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();

        // SET NX 成功时返回 "OK"，失败时返回 nil
        let result: Option<String> = redis::cmd("SET")
            .arg(self.redis_key(resource_key))
            .arg(lock_id)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(lock_type))
            .query_async(&mut conn)
            .await?;

        let acquired = result.is_some();
        debug!(acquired, "Redis lock attempt");
        Ok(acquired)
    }

    #[instrument(skip(self, _lock_type))]
    async fn try_release(
        &self,
        lock_id: &str,
        resource_key: &str,
        _lock_type: &LockType,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();

        let deleted: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(self.redis_key(resource_key))
            .arg(lock_id)
            .invoke_async(&mut conn)
            .await?;

        debug!(released = deleted > 0, "Redis lock release attempt");
        Ok(deleted > 0)
    }
}
