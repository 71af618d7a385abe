//! PostgreSQL 锁存储
//!
//! 每个锁槽对应 `submission_locks` 表中的一行。认领通过
//! `INSERT ... ON CONFLICT DO UPDATE ... WHERE expires_at < NOW()` 一条语句完成：
//! 空槽直接插入，过期槽被抢占，未过期槽不受影响。过期时间使用数据库时钟，
//! 避免各工作进程之间的时钟偏差。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use submission_shared::config::DatabaseConfig;
use submission_shared::database;
use tracing::{debug, info, instrument};

use super::LockStore;
use crate::error::Result;
use crate::lock_type::LockType;

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS submission_locks (
        lock_key    TEXT PRIMARY KEY,
        lock_id     TEXT NOT NULL,
        lock_type   TEXT NOT NULL,
        expires_at  TIMESTAMPTZ NOT NULL,
        acquired_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

const ACQUIRE_SQL: &str = r#"
    INSERT INTO submission_locks (lock_key, lock_id, lock_type, expires_at)
    VALUES ($1, $2, $3, NOW() + make_interval(secs => $4))
    ON CONFLICT (lock_key) DO UPDATE
        SET lock_id = EXCLUDED.lock_id,
            lock_type = EXCLUDED.lock_type,
            expires_at = EXCLUDED.expires_at,
            acquired_at = NOW()
        WHERE submission_locks.expires_at < NOW()
"#;

const RELEASE_SQL: &str =
    r#"DELETE FROM submission_locks WHERE lock_key = $1 AND lock_id = $2"#;

/// 锁表中一行的当前状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub lock_id: String,
    pub lock_type: String,
    pub expires_at: DateTime<Utc>,
}

/// PostgreSQL 锁存储
#[derive(Clone)]
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按配置建池（含可达性检查）并确保锁表存在
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = database::connect_pool(config).await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// 创建锁表（幂等）
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        info!("submission_locks table ready");
        Ok(())
    }

    /// 查询锁槽当前持有者（已过期的视为无人持有）
    pub async fn holder(&self, resource_key: &str) -> Result<Option<LockHolder>> {
        let row: Option<(String, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT lock_id, lock_type, expires_at
            FROM submission_locks
            WHERE lock_key = $1 AND expires_at >= NOW()
            "#,
        )
        .bind(resource_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(lock_id, lock_type, expires_at)| LockHolder {
            lock_id,
            lock_type,
            expires_at,
        }))
    }

    /// 清理所有已过期的锁行，返回删除的行数
    ///
    /// 认领时会顺带抢占过期行，此方法只用于控制表大小。
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query(r#"DELETE FROM submission_locks WHERE expires_at < NOW()"#)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    #[instrument(skip(self, lock_type), fields(lock_type = lock_type.name()))]
    async fn try_acquire(
        &self,
        lock_id: &str,
        resource_key: &str,
        lock_type: &LockType,
    ) -> Result<bool> {
        let result = sqlx::query(ACQUIRE_SQL)
            .bind(resource_key)
            .bind(lock_id)
            .bind(lock_type.name())
            .bind(lock_type.expiration_timeout().as_secs_f64())
            .execute(&self.pool)
            .await?;

        let acquired = result.rows_affected() > 0;
        debug!(acquired, "Database lock attempt");
        Ok(acquired)
    }

    #[instrument(skip(self, _lock_type))]
    async fn try_release(
        &self,
        lock_id: &str,
        resource_key: &str,
        _lock_type: &LockType,
    ) -> Result<bool> {
        let result = sqlx::query(RELEASE_SQL)
            .bind(resource_key)
            .bind(lock_id)
            .execute(&self.pool)
            .await?;

        let released = result.rows_affected() > 0;
        debug!(released, "Database lock release attempt");
        Ok(released)
    }
}
