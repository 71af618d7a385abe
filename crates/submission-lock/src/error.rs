//! 提交锁错误类型
//!
//! 区分调用方错误（参数）、竞争失败（超时）和底层故障（存储/等待原语）。

use submission_shared::error::SharedError;
use thiserror::Error;

/// 提交锁错误类型
#[derive(Debug, Error)]
pub enum LockError {
    #[error("无效的参数: {field} - {message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },

    #[error("获取锁超时: lock_id={lock_id}, resource_key={resource_key}")]
    LockTimeout {
        lock_id: String,
        resource_key: String,
    },

    #[error("锁存储故障: resource_key={resource_key}: {source}")]
    LockStoreFailure {
        resource_key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    /// 建立存储连接时的基础设施错误
    #[error(transparent)]
    Shared(#[from] SharedError),
}

/// 提交锁 Result 类型别名
pub type Result<T> = std::result::Result<T, LockError>;

impl LockError {
    /// 构造参数错误
    pub fn invalid_argument(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::LockStoreFailure { .. } => "LOCK_STORE_FAILURE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Shared(e) => e.code(),
        }
    }

    /// 调用方稍后重新执行整个操作是否有意义
    ///
    /// 本组件自身不会在固定预算之外重试。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LockTimeout { .. } | Self::Database(_) | Self::Redis(_) => true,
            Self::Shared(e) => e.is_retryable(),
            Self::InvalidArgument { .. } | Self::LockStoreFailure { .. } => false,
        }
    }
}
