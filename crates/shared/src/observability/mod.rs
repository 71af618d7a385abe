//! 统一可观测性模块
//!
//! 提供 logging 与 metrics 的统一初始化。
//! 所有入口通过单一函数配置可观测性，确保一致的日志格式和指标命名。

pub mod logging;
pub mod metrics;

use anyhow::Result;
use serde::Deserialize;
use tracing::info;

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 服务名称，用于标识日志和指标的来源
    pub service_name: String,

    /// 日志级别（如 "info", "debug"），RUST_LOG 优先
    pub log_level: String,

    /// 是否启用 JSON 格式日志
    pub json_logs: bool,

    /// 是否启用 Prometheus 指标导出
    pub metrics_enabled: bool,

    /// Prometheus 指标导出端口
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    /// 注入服务名（配置文件中通常不单独配置）
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }
}

/// 可观测性资源守卫
///
/// 持有可观测性资源的生命周期，drop 时记录关闭日志。
pub struct ObservabilityGuard {
    metrics_enabled: bool,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!(
            metrics_enabled = self.metrics_enabled,
            "Shutting down observability..."
        );
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Logging（tracing-subscriber）
/// 2. Metrics（Prometheus 指标，可选）
///
/// 必须在 tokio 运行时内调用：Prometheus 导出器会派生 HTTP 监听任务。
pub fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    logging::init(config)?;

    info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        metrics_enabled = config.metrics_enabled,
        "Observability initialized"
    );

    if config.metrics_enabled {
        metrics::init(config)?;
    }

    Ok(ObservabilityGuard {
        metrics_enabled: config.metrics_enabled,
    })
}
