//! 调用上下文
//!
//! 锁的使用方通过上下文提供锁存储句柄和当前用户身份。

use std::fmt;
use std::sync::Arc;

use crate::store::LockStore;

/// 调用上下文
#[derive(Clone)]
pub struct CallingContext {
    store: Arc<dyn LockStore>,
    current_user: String,
}

impl CallingContext {
    pub fn new(store: Arc<dyn LockStore>, current_user: impl Into<String>) -> Self {
        Self {
            store,
            current_user: current_user.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    pub fn current_user(&self) -> &str {
        &self.current_user
    }
}

impl fmt::Debug for CallingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallingContext")
            .field("current_user", &self.current_user)
            .finish_non_exhaustive()
    }
}
