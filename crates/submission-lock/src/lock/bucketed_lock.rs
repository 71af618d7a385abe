//! 分桶重试锁
//!
//! 一个实例对应一次"在本操作期间锁住某个提交"的使用：派生锁键、
//! 生成一次性的 lock_id，并以固定预算重试认领和释放。

use rand::rngs::StdRng;
use std::future::Future;
use std::sync::Arc;
use submission_shared::observability::metrics::{
    record_lock_acquire, record_lock_backoff, record_lock_release,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::context::CallingContext;
use crate::error::{LockError, Result};
use crate::key::LockKey;
use crate::lock_type::LockType;
use crate::policy::{Backoff, LockPolicy};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::store::LockStore;

/// 分桶重试锁
///
/// 非线程安全：退避状态和 lock_id 代表同一个逻辑持有者，
/// 所有操作都需要 `&mut self`，不要在多个调用方之间共享实例。
/// 不可重入，也不能改用于其他资源。
pub struct BucketedRetryLock {
    key: LockKey,
    lock_id: String,
    lock_type: LockType,
    user: String,
    store: Arc<dyn LockStore>,
    sleeper: Arc<dyn Sleeper>,
    policy: LockPolicy,
    backoff: Backoff,
    /// 最近一次 acquire 成功且尚未释放
    held: bool,
}

impl BucketedRetryLock {
    /// 为表单提交创建锁
    ///
    /// 实例标识为空时返回 `InvalidArgument`。
    pub fn new(form_id: &str, instance_id: &str, ctx: &CallingContext) -> Result<Self> {
        let key = LockKey::for_submission(form_id, instance_id)?;
        let policy = LockPolicy::default();

        Ok(Self {
            key,
            lock_id: Uuid::new_v4().to_string(),
            lock_type: LockType::MODIFICATION,
            user: ctx.current_user().to_string(),
            store: Arc::clone(ctx.store()),
            sleeper: Arc::new(TokioSleeper),
            policy,
            backoff: Backoff::new(policy.initial_max_backoff),
            held: false,
        })
    }

    /// 实例标识可能缺失时的入口，缺失等同于空
    pub fn from_optional(
        form_id: &str,
        instance_id: Option<&str>,
        ctx: &CallingContext,
    ) -> Result<Self> {
        match instance_id {
            Some(instance_id) => Self::new(form_id, instance_id, ctx),
            None => Err(LockError::invalid_argument(
                "instance_id",
                "instance_id cannot be null or empty",
            )),
        }
    }

    /// 替换重试策略
    pub fn with_policy(mut self, policy: LockPolicy) -> Self {
        self.policy = policy;
        self.backoff = Backoff::new(policy.initial_max_backoff);
        self
    }

    /// 替换等待原语
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// 使用指定随机源抽取退避时长
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.backoff = Backoff::with_rng(self.policy.initial_max_backoff, rng);
        self
    }

    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn resource_key(&self) -> &str {
        self.key.as_str()
    }

    pub fn lock_type(&self) -> &LockType {
        &self.lock_type
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// 获取锁
    ///
    /// 最多尝试 `policy.tries` 次，两次尝试之间随机退避。
    /// 全部失败返回 `LockTimeout`；存储或等待原语出错立即返回 `LockStoreFailure`，
    /// 此时无法确定锁的归属，继续重试并不安全。
    #[instrument(
        skip(self),
        fields(lock_id = %self.lock_id, resource_key = %self.key, user = %self.user)
    )]
    pub async fn acquire(&mut self) -> Result<()> {
        self.backoff.reset();
        let tries = self.policy.tries;

        for attempt in 1..=tries {
            match self
                .store
                .try_acquire(&self.lock_id, self.key.as_str(), &self.lock_type)
                .await
            {
                Ok(true) => {
                    debug!(attempt, "Submission lock acquired");
                    self.held = true;
                    record_lock_acquire("acquired", attempt);
                    return Ok(());
                }
                Ok(false) => {
                    debug!(attempt, "Submission lock busy");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Lock store failed during acquire");
                    record_lock_acquire("store_failure", attempt);
                    return Err(self.store_failure(e));
                }
            }

            if attempt < tries {
                let delay = self.backoff.next_delay();
                debug!(
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "Lock not acquired, backing off"
                );
                record_lock_backoff(delay);

                if let Err(e) = self.sleeper.sleep(delay).await {
                    warn!(attempt, error = %e, "Backoff interrupted during acquire");
                    record_lock_acquire("interrupted", attempt);
                    return Err(self.store_failure(e));
                }
            }
        }

        warn!(tries, "Timed out acquiring submission lock");
        record_lock_acquire("timeout", tries);
        Err(LockError::LockTimeout {
            lock_id: self.lock_id.clone(),
            resource_key: self.key.to_string(),
        })
    }

    /// 释放锁（尽力而为）
    ///
    /// 与 acquire 相同的重试预算和退避，但从不返回错误：
    /// 未释放的锁会在 `LockType::expiration_timeout` 后被存储回收，
    /// 释放失败只影响性能，不影响正确性。
    #[instrument(
        skip(self),
        fields(lock_id = %self.lock_id, resource_key = %self.key, user = %self.user)
    )]
    pub async fn release(&mut self) {
        self.backoff.reset();
        self.held = false;
        let tries = self.policy.tries;

        for attempt in 1..=tries {
            match self
                .store
                .try_release(&self.lock_id, self.key.as_str(), &self.lock_type)
                .await
            {
                Ok(true) => {
                    debug!(attempt, "Submission lock released");
                    record_lock_release("released");
                    return;
                }
                Ok(false) => {
                    debug!(attempt, "Submission lock release rejected");
                }
                Err(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        "Lock store failed during release - lock will expire via TTL"
                    );
                    record_lock_release("store_failure");
                    return;
                }
            }

            if attempt < tries {
                let delay = self.backoff.next_delay();
                record_lock_backoff(delay);

                if let Err(e) = self.sleeper.sleep(delay).await {
                    debug!(attempt, error = %e, "Backoff interrupted, abandoning release");
                    record_lock_release("interrupted");
                    return;
                }
            }
        }

        warn!(
            tries,
            "Gave up releasing submission lock - lock will expire via TTL"
        );
        record_lock_release("gave_up");
    }

    /// 在持有锁期间执行 `f`，结束后总是释放
    pub async fn with_lock<F, Fut, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await?;
        let output = f().await;
        self.release().await;
        Ok(output)
    }

    fn store_failure(&self, source: impl std::error::Error + Send + Sync + 'static) -> LockError {
        LockError::LockStoreFailure {
            resource_key: self.key.to_string(),
            source: Box::new(source),
        }
    }
}

impl Drop for BucketedRetryLock {
    fn drop(&mut self) {
        if self.held {
            // Drop 中无法执行异步释放，锁最终会通过 TTL 过期
            warn!(
                lock_id = %self.lock_id,
                resource_key = %self.key,
                "BucketedRetryLock dropped while held - lock will expire via TTL"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::SleepError;
    use crate::store::MockLockStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// 只记录等待时长，不真正休眠
    #[derive(Default)]
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
        fail: bool,
    }

    impl RecordingSleeper {
        fn failing() -> Self {
            Self {
                sleeps: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) -> std::result::Result<(), SleepError> {
            self.sleeps.lock().push(duration);
            if self.fail {
                Err(SleepError("interrupted".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn lock_with(store: MockLockStore, sleeper: Arc<RecordingSleeper>) -> BucketedRetryLock {
        let ctx = CallingContext::new(Arc::new(store), "tester@localhost");
        BucketedRetryLock::new("household_survey", "uuid:1234", &ctx)
            .unwrap()
            .with_sleeper(sleeper)
            .with_rng(StdRng::seed_from_u64(42))
    }

    fn store_error() -> LockError {
        LockError::Database(sqlx::Error::PoolTimedOut)
    }

    #[test]
    fn test_new_derives_key_and_lock_id() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let lock = lock_with(MockLockStore::new(), sleeper);

        assert!(lock.resource_key().starts_with("submission|household_survey|"));
        assert_eq!(lock.key().bucket(), LockKey::bucket_of("uuid:1234"));
        assert!(Uuid::parse_str(lock.lock_id()).is_ok());
        assert_eq!(lock.lock_type(), &LockType::MODIFICATION);
        assert_eq!(lock.policy(), &LockPolicy::default());
        assert!(!lock.is_held());
    }

    #[test]
    fn test_each_instance_gets_fresh_lock_id() {
        let ctx = CallingContext::new(Arc::new(MockLockStore::new()), "tester");
        let a = BucketedRetryLock::new("form", "uuid:1", &ctx).unwrap();
        let b = BucketedRetryLock::new("form", "uuid:1", &ctx).unwrap();

        assert_eq!(a.resource_key(), b.resource_key());
        assert_ne!(a.lock_id(), b.lock_id());
    }

    #[test]
    fn test_empty_or_missing_instance_id_rejected() {
        let ctx = CallingContext::new(Arc::new(MockLockStore::new()), "tester");

        let err = BucketedRetryLock::new("form", "", &ctx).err().unwrap();
        assert!(matches!(err, LockError::InvalidArgument { .. }));

        let err = BucketedRetryLock::from_optional("form", None, &ctx).err().unwrap();
        assert!(matches!(err, LockError::InvalidArgument { .. }));

        assert!(BucketedRetryLock::from_optional("form", Some("uuid:9"), &ctx).is_ok());
        assert!(BucketedRetryLock::new("form", " ", &ctx).is_ok());
    }

    #[tokio::test]
    async fn test_acquire_first_try() {
        let mut store = MockLockStore::new();
        store
            .expect_try_acquire()
            .times(1)
            .returning(|_, _, _| Ok(true));

        let sleeper = Arc::new(RecordingSleeper::default());
        let mut lock = lock_with(store, sleeper.clone());

        lock.acquire().await.unwrap();

        assert!(lock.is_held());
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_acquire_times_out_after_four_attempts() {
        let mut store = MockLockStore::new();
        store
            .expect_try_acquire()
            .times(4)
            .returning(|_, _, _| Ok(false));

        let sleeper = Arc::new(RecordingSleeper::default());
        let mut lock = lock_with(store, sleeper.clone());
        let lock_id = lock.lock_id().to_string();
        let resource_key = lock.resource_key().to_string();

        let err = lock.acquire().await.unwrap_err();

        match err {
            LockError::LockTimeout {
                lock_id: id,
                resource_key: key,
            } => {
                assert_eq!(id, lock_id);
                assert_eq!(key, resource_key);
            }
            other => panic!("expected LockTimeout, got {:?}", other),
        }

        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 3);
        for (sleep, bound_ms) in sleeps.iter().zip([250u64, 500, 1000]) {
            assert!(*sleep < Duration::from_millis(bound_ms));
        }
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_acquire_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut store = MockLockStore::new();
        store
            .expect_try_acquire()
            .times(3)
            .returning(move |_, _, _| Ok(counter.fetch_add(1, Ordering::SeqCst) == 2));

        let sleeper = Arc::new(RecordingSleeper::default());
        let mut lock = lock_with(store, sleeper.clone());

        lock.acquire().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.sleeps().len(), 2);
        assert!(lock.is_held());
    }

    #[tokio::test]
    async fn test_acquire_store_failure_is_not_retried() {
        let mut store = MockLockStore::new();
        store
            .expect_try_acquire()
            .times(1)
            .returning(|_, _, _| Err(store_error()));

        let sleeper = Arc::new(RecordingSleeper::default());
        let mut lock = lock_with(store, sleeper.clone());

        let err = lock.acquire().await.unwrap_err();

        assert!(matches!(err, LockError::LockStoreFailure { .. }));
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_acquire_interrupted_sleep_surfaces() {
        let mut store = MockLockStore::new();
        store
            .expect_try_acquire()
            .times(1)
            .returning(|_, _, _| Ok(false));

        let sleeper = Arc::new(RecordingSleeper::failing());
        let mut lock = lock_with(store, sleeper.clone());

        let err = lock.acquire().await.unwrap_err();

        assert!(matches!(err, LockError::LockStoreFailure { .. }));
        assert_eq!(err.error_code(), "LOCK_STORE_FAILURE");
        assert_eq!(sleeper.sleeps().len(), 1);
    }

    #[tokio::test]
    async fn test_release_never_errors_after_four_rejections() {
        let mut store = MockLockStore::new();
        store
            .expect_try_release()
            .times(4)
            .returning(|_, _, _| Ok(false));

        let sleeper = Arc::new(RecordingSleeper::default());
        let mut lock = lock_with(store, sleeper.clone());

        lock.release().await;

        assert_eq!(sleeper.sleeps().len(), 3);
    }

    #[tokio::test]
    async fn test_release_stops_on_store_failure() {
        let mut store = MockLockStore::new();
        store
            .expect_try_release()
            .times(1)
            .returning(|_, _, _| Err(store_error()));

        let sleeper = Arc::new(RecordingSleeper::default());
        let mut lock = lock_with(store, sleeper.clone());

        lock.release().await;

        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_release_abandons_on_interrupted_sleep() {
        let mut store = MockLockStore::new();
        store
            .expect_try_release()
            .times(1)
            .returning(|_, _, _| Ok(false));

        let sleeper = Arc::new(RecordingSleeper::failing());
        let mut lock = lock_with(store, sleeper.clone());

        lock.release().await;

        assert_eq!(sleeper.sleeps().len(), 1);
    }

    #[tokio::test]
    async fn test_backoff_restarts_on_every_call() {
        let mut store = MockLockStore::new();
        store
            .expect_try_acquire()
            .times(8)
            .returning(|_, _, _| Ok(false));
        store
            .expect_try_release()
            .times(4)
            .returning(|_, _, _| Ok(false));

        let sleeper = Arc::new(RecordingSleeper::default());
        let mut lock = lock_with(store, sleeper.clone());

        assert!(matches!(
            lock.acquire().await,
            Err(LockError::LockTimeout { .. })
        ));
        assert!(matches!(
            lock.acquire().await,
            Err(LockError::LockTimeout { .. })
        ));
        lock.release().await;

        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 9);
        // 每次调用都从 250ms 上限重新开始：250 / 500 / 1000
        for (call, chunk) in sleeps.chunks(3).enumerate() {
            for (sleep, bound_ms) in chunk.iter().zip([250u64, 500, 1000]) {
                assert!(
                    *sleep < Duration::from_millis(bound_ms),
                    "call {} slept {:?}, bound {}ms",
                    call,
                    sleep,
                    bound_ms
                );
            }
        }
    }

    #[tokio::test]
    async fn test_same_lock_id_used_for_acquire_and_release() {
        let seen = Arc::new(Mutex::new(Vec::<(String, String)>::new()));

        let mut store = MockLockStore::new();
        let acquire_seen = seen.clone();
        store
            .expect_try_acquire()
            .times(1)
            .returning(move |id, key, _| {
                acquire_seen.lock().push((id.to_string(), key.to_string()));
                Ok(true)
            });
        let release_seen = seen.clone();
        store
            .expect_try_release()
            .times(1)
            .returning(move |id, key, lock_type| {
                assert_eq!(lock_type, &LockType::MODIFICATION);
                release_seen.lock().push((id.to_string(), key.to_string()));
                Ok(true)
            });

        let sleeper = Arc::new(RecordingSleeper::default());
        let mut lock = lock_with(store, sleeper);

        lock.acquire().await.unwrap();
        lock.release().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
        assert_eq!(seen[0].0, lock.lock_id());
        assert_eq!(seen[0].1, lock.resource_key());
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_custom_policy_limits_attempts() {
        let mut store = MockLockStore::new();
        store
            .expect_try_acquire()
            .times(2)
            .returning(|_, _, _| Ok(false));

        let sleeper = Arc::new(RecordingSleeper::default());
        let mut lock = lock_with(store, sleeper.clone())
            .with_policy(LockPolicy::new(2, Duration::from_millis(10)).unwrap());

        let err = lock.acquire().await.unwrap_err();

        assert!(matches!(err, LockError::LockTimeout { .. }));
        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 1);
        assert!(sleeps[0] < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_with_lock_runs_and_releases() {
        let mut store = MockLockStore::new();
        store
            .expect_try_acquire()
            .times(1)
            .returning(|_, _, _| Ok(true));
        store
            .expect_try_release()
            .times(1)
            .returning(|_, _, _| Ok(true));

        let sleeper = Arc::new(RecordingSleeper::default());
        let mut lock = lock_with(store, sleeper);

        let value = lock.with_lock(|| async { 7 }).await.unwrap();

        assert_eq!(value, 7);
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_with_lock_skips_body_on_timeout() {
        let mut store = MockLockStore::new();
        store
            .expect_try_acquire()
            .times(4)
            .returning(|_, _, _| Ok(false));
        store.expect_try_release().never();

        let sleeper = Arc::new(RecordingSleeper::default());
        let mut lock = lock_with(store, sleeper);
        let ran = Arc::new(AtomicU32::new(0));
        let flag = ran.clone();

        let result = lock
            .with_lock(|| async move {
                flag.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(matches!(result, Err(LockError::LockTimeout { .. })));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
