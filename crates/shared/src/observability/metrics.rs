//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 未安装 recorder 时所有记录函数都是空操作。

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use super::ObservabilityConfig;

/// 初始化 Prometheus 指标导出
///
/// 导出器自带 HTTP 监听，在指定端口暴露 `/metrics`。
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!("Metrics exporter listening on {}", addr);

    register_lock_metrics(&config.service_name);
    Ok(())
}

/// 注册锁相关指标的描述
fn register_lock_metrics(service_name: &str) {
    metrics::describe_counter!(
        "submission_lock_acquire_total",
        "Total number of submission lock acquire calls by outcome"
    );
    metrics::describe_histogram!(
        "submission_lock_acquire_attempts",
        "Store attempts made per acquire call"
    );
    metrics::describe_counter!(
        "submission_lock_release_total",
        "Total number of submission lock release calls by outcome"
    );
    metrics::describe_histogram!(
        "submission_lock_backoff_seconds",
        "Backoff sleep durations between lock attempts"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次 acquire 调用的结果
#[inline]
pub fn record_lock_acquire(outcome: &'static str, attempts: u32) {
    metrics::counter!("submission_lock_acquire_total", "outcome" => outcome).increment(1);
    metrics::histogram!("submission_lock_acquire_attempts").record(f64::from(attempts));
}

/// 记录一次 release 调用的结果
#[inline]
pub fn record_lock_release(outcome: &'static str) {
    metrics::counter!("submission_lock_release_total", "outcome" => outcome).increment(1);
}

/// 记录一次退避等待
#[inline]
pub fn record_lock_backoff(delay: Duration) {
    metrics::histogram!("submission_lock_backoff_seconds").record(delay.as_secs_f64());
}
