//! 提交锁模块
//!
//! 在只提供"尝试认领"原语的外部锁存储之上，实现带有限重试、
//! 抖动指数退避和确定性超时的互斥锁。
//!
//! ## 设计要点
//!
//! - **分桶**: 实例标识散列进每个表单 256 个桶之一
//! - **单一所有者**: 锁实例不可共享，操作需要 `&mut self`
//! - **acquire 严格**: 超时或底层故障都会返回错误
//! - **release 尽力而为**: 从不返回错误，未释放的锁由存储过期回收
//!
//! ## 使用示例
//!
//! ```ignore
//! let ctx = CallingContext::new(store, "worker@host");
//! let mut lock = BucketedRetryLock::new("household_survey", "uuid:1234", &ctx)?;
//!
//! lock.acquire().await?;
//! update_submission().await?;
//! lock.release().await;
//! ```

mod bucketed_lock;
mod context;

pub use bucketed_lock::BucketedRetryLock;
pub use context::CallingContext;
