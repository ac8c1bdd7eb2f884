//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use super::ObservabilityConfig;

/// Metrics 资源守卫
#[derive(Debug)]
pub struct MetricsHandle {
    pub addr: SocketAddr,
}

/// 规则树评估次数
pub const RULE_TREE_EVALUATIONS_TOTAL: &str = "rule_tree_evaluations_total";
/// 规则树评估耗时
pub const RULE_TREE_EVALUATION_DURATION_SECONDS: &str = "rule_tree_evaluation_duration_seconds";
/// 编排周期次数（按结果分类）
pub const ORCHESTRATION_CYCLES_TOTAL: &str = "orchestration_cycles_total";
/// 编排周期耗时
pub const ORCHESTRATION_CYCLE_DURATION_SECONDS: &str = "orchestration_cycle_duration_seconds";
/// 自定义操作符调用次数
pub const CUSTOM_OPERATOR_CALLS_TOTAL: &str = "custom_operator_calls_total";

/// 初始化 Prometheus 指标导出
///
/// 由 exporter 自带的 HTTP listener 在指定端口暴露 `/metrics`。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    register_common_metrics(&config.service_name);
    info!("Metrics exporter listening on {}", addr);

    Ok(MetricsHandle { addr })
}

/// 注册通用指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        RULE_TREE_EVALUATIONS_TOTAL,
        "Total number of rule tree evaluations"
    );
    metrics::describe_histogram!(
        RULE_TREE_EVALUATION_DURATION_SECONDS,
        "Rule tree evaluation duration in seconds"
    );
    metrics::describe_counter!(
        ORCHESTRATION_CYCLES_TOTAL,
        "Total number of simulate-then-commit cycles"
    );
    metrics::describe_histogram!(
        ORCHESTRATION_CYCLE_DURATION_SECONDS,
        "Simulate-then-commit cycle duration in seconds"
    );
    metrics::describe_counter!(
        CUSTOM_OPERATOR_CALLS_TOTAL,
        "Total number of custom operator invocations"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}
