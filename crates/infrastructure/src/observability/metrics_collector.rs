//! 业务指标
//!
//! 指标通过 `metrics` 门面记录，由二进制入口安装 Prometheus 记录器后导出。
//! 未安装记录器时所有调用都是空操作。

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

pub struct FleetMetrics;

impl FleetMetrics {
    /// 注册指标说明，需在安装记录器之后调用
    pub fn describe() {
        describe_counter!("fleet_node_requests_total", "发往节点的请求次数");
        describe_histogram!(
            "fleet_node_request_duration_seconds",
            Unit::Seconds,
            "节点请求耗时"
        );
        describe_counter!("fleet_task_fires_total", "任务触发次数");
        describe_counter!("fleet_reconcile_upserts_total", "对账写入的作业行数");
        describe_counter!("fleet_deployments_total", "部署次数");
    }

    /// 记录一次节点请求
    pub fn record_node_request(endpoint: &'static str, success: bool, elapsed: Duration) {
        let outcome = if success { "success" } else { "failure" };
        counter!("fleet_node_requests_total", "endpoint" => endpoint, "outcome" => outcome)
            .increment(1);
        histogram!("fleet_node_request_duration_seconds", "endpoint" => endpoint)
            .record(elapsed.as_secs_f64());
    }

    /// outcome: success / error / panic
    pub fn record_task_fire(outcome: &'static str) {
        counter!("fleet_task_fires_total", "outcome" => outcome).increment(1);
    }

    /// result: written / ignored / skipped
    pub fn record_reconcile_upsert(result: &'static str, count: u64) {
        if count > 0 {
            counter!("fleet_reconcile_upserts_total", "result" => result).increment(count);
        }
    }

    /// outcome: completed / build_error
    pub fn record_deployment(outcome: &'static str) {
        counter!("fleet_deployments_total", "outcome" => outcome).increment(1);
    }
}
