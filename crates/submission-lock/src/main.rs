//! 提交锁探针
//!
//! 按配置连接锁存储，对给定的表单提交执行一次 acquire/release，
//! 用于验证部署环境中的锁存储是否可用。
//!
//! ```bash
//! SUBMISSION_LOCK__BACKEND=redis submission-lock household_survey uuid:1234
//! ```

use anyhow::{Result, bail};
use std::sync::Arc;
use submission_shared::{
    cache::Cache,
    config::{AppConfig, LockBackend},
    observability,
};
use tracing::{info, warn};

use submission_lock::{
    BucketedRetryLock, CallingContext, InMemoryLockStore, LockError, LockPolicy, LockStore,
    PgLockStore, RedisLockStore,
};

const SERVICE_NAME: &str = "submission-lock";

/// 按配置构建锁存储
async fn build_store(config: &AppConfig) -> Result<Arc<dyn LockStore>> {
    let store: Arc<dyn LockStore> = match config.lock.backend {
        LockBackend::Memory => Arc::new(InMemoryLockStore::new()),
        LockBackend::Redis => {
            let cache = Cache::new(&config.redis)?;
            cache.health_check().await?;
            Arc::new(RedisLockStore::connect(&cache).await?)
        }
        LockBackend::Postgres => Arc::new(PgLockStore::connect(&config.database).await?),
    };
    Ok(store)
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "anonymous".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置，失败时使用默认值（内存存储）
    let (config, load_error) = match AppConfig::load(SERVICE_NAME) {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    // 2. 初始化可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(SERVICE_NAME);
    let _guard = observability::init(&obs_config)?;
    if let Some(e) = load_error {
        warn!("Failed to load config, using defaults: {}", e);
    }

    let mut args = std::env::args().skip(1);
    let (Some(form_id), Some(instance_id)) = (args.next(), args.next()) else {
        bail!("usage: {} <form_id> <instance_id>", SERVICE_NAME);
    };

    info!(
        environment = %config.environment,
        backend = ?config.lock.backend,
        "Configuration loaded"
    );

    // 3. 构建锁存储与锁
    let store = build_store(&config).await?;
    let ctx = CallingContext::new(store, current_user());
    let policy = LockPolicy::try_from(&config.lock)?;
    let mut lock = BucketedRetryLock::new(&form_id, &instance_id, &ctx)?.with_policy(policy);

    info!(
        resource_key = %lock.resource_key(),
        lock_id = %lock.lock_id(),
        worst_case_wait_ms = policy.worst_case_wait().as_millis() as u64,
        "Probing submission lock"
    );

    // 4. 获取并释放
    match lock.acquire().await {
        Ok(()) => {
            info!("Lock acquired");
            lock.release().await;
            info!("Lock released");
            Ok(())
        }
        Err(e @ LockError::LockTimeout { .. }) => {
            warn!(error = %e, "Lock is currently held by another worker");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
