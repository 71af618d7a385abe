//! 锁键派生
//!
//! 把实例标识散列到每个表单固定的 256 个桶中：锁粒度比单个实例粗、
//! 比整个表单细，锁行数量有上界，同一表单的不同实例大概率落在不同桶里。

use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{LockError, Result};

/// 提交锁命名空间
pub const SUBMISSION_NAMESPACE: &str = "submission";

/// 每个表单的桶数量
pub const BUCKET_COUNT: usize = 256;

/// 派生出的锁键：`submission|<form_id>|<bucket>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    form_id: String,
    bucket: u8,
    resource_key: String,
}

impl LockKey {
    /// 为某个表单提交派生锁键
    ///
    /// 空实例标识直接拒绝；任何非空字符串（包括纯空白）都能分桶。
    pub fn for_submission(form_id: &str, instance_id: &str) -> Result<Self> {
        if instance_id.is_empty() {
            return Err(LockError::invalid_argument(
                "instance_id",
                "instance_id cannot be null or empty",
            ));
        }

        let bucket = Self::bucket_of(instance_id);
        Ok(Self {
            form_id: form_id.to_string(),
            bucket,
            resource_key: format!("{}|{}|{:02x}", SUBMISSION_NAMESPACE, form_id, bucket),
        })
    }

    /// 实例标识所属的桶
    ///
    /// 取 SHA-256 摘要的最低 8 位。所有共享同一存储的进程必须得到相同的桶，
    /// 因此不能使用进程内随机化的哈希。
    pub fn bucket_of(instance_id: &str) -> u8 {
        let digest = Sha256::digest(instance_id.as_bytes());
        digest[digest.len() - 1]
    }

    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    pub fn bucket(&self) -> u8 {
        self.bucket
    }

    pub fn as_str(&self) -> &str {
        &self.resource_key
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_key)
    }
}
