//! 锁存储抽象
//!
//! 外部锁存储只提供一个原语：带过期时间、原子地认领一个命名锁槽。
//! 本模块定义该接口，并附带三种实现：
//!
//! - **InMemoryLockStore**: 进程内实现，用于单进程部署和测试
//! - **RedisLockStore**: `SET NX PX` + Lua 校验删除
//! - **PgLockStore**: PostgreSQL 锁表，过期行可被抢占
//!
//! ## 过期契约
//!
//! 每次调用都会携带 `LockType`，实现必须在 `expiration_timeout` 之后
//! 自动回收未释放的锁。释放失败时调用方只记录日志，依赖的正是这一保证。

mod memory_store;
mod pg_store;
mod redis_store;

pub use memory_store::InMemoryLockStore;
pub use pg_store::{LockHolder, PgLockStore};
pub use redis_store::RedisLockStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::lock_type::LockType;

/// 锁存储接口
///
/// 两个操作都是非阻塞、原子的。`Ok(false)` 表示锁被他人持有（acquire）
/// 或调用方不是持有者（release）；`Err` 仅表示存储本身的故障。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LockStore: Send + Sync {
    /// 尝试以 `lock_id` 的身份认领 `resource_key`
    async fn try_acquire(
        &self,
        lock_id: &str,
        resource_key: &str,
        lock_type: &LockType,
    ) -> Result<bool>;

    /// 尝试释放 `lock_id` 持有的 `resource_key`
    async fn try_release(
        &self,
        lock_id: &str,
        resource_key: &str,
        lock_type: &LockType,
    ) -> Result<bool>;
}
