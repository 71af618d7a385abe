//! 提交锁
//!
//! 序列化对同一表单提交的并发修改：多个工作进程可能同时修改同一提交，
//! 通过外部锁存储实现分桶、有限重试的分布式互斥。
//!
//! ## 模块结构
//!
//! - `key`: 锁键派生（表单 + 实例桶）
//! - `lock_type`: 锁类型与过期时间
//! - `policy`: 重试策略与抖动退避
//! - `sleeper`: 可替换的退避等待原语
//! - `store`: 锁存储接口及内存 / Redis / PostgreSQL 实现
//! - `lock`: 分桶重试锁
//! - `error`: 错误类型定义

pub mod error;
pub mod key;
pub mod lock;
pub mod lock_type;
pub mod policy;
pub mod sleeper;
pub mod store;

pub use error::{LockError, Result};
pub use key::LockKey;
pub use lock::{BucketedRetryLock, CallingContext};
pub use lock_type::LockType;
pub use policy::LockPolicy;
pub use sleeper::{SleepError, Sleeper, TokioSleeper};
pub use store::{InMemoryLockStore, LockStore, PgLockStore, RedisLockStore};
