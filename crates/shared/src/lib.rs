//! 共享基础设施
//!
//! 提交锁工作区共用的配置加载、错误类型、数据库/Redis 连接以及可观测性初始化。

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod observability;
