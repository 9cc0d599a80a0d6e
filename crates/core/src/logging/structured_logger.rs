use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 带 `event` 字段的结构化日志入口
///
/// 日志聚合端按 `event` 字段检索，各组件只通过这里输出关键业务事件。
pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_task_registered(task_id: Uuid, task_name: &str, schedule: &str) {
        info!(
            event = "task_registered",
            task.id = %task_id,
            task.name = task_name,
            task.schedule = schedule,
            "任务已注册到调度引擎"
        );
    }

    pub fn log_task_unregistered(task_id: Uuid, task_name: &str) {
        info!(
            event = "task_unregistered",
            task.id = %task_id,
            task.name = task_name,
            "任务已从调度引擎注销"
        );
    }

    pub fn log_task_fired(task_id: Uuid, node: &str, job_id: &str, fired_at: DateTime<Utc>) {
        info!(
            event = "task_fired",
            task.id = %task_id,
            node = node,
            job.id = job_id,
            fired_at = %fired_at,
            "任务已触发，调度请求已发送到节点"
        );
    }

    pub fn log_task_failed(task_id: Uuid, node: &str, job_id: &str, error: &str) {
        error!(
            event = "task_failed",
            task.id = %task_id,
            node = node,
            job.id = job_id,
            error = error,
            "任务触发失败"
        );
    }

    pub fn log_task_panicked(task_id: Uuid, task_name: &str, panic: &str) {
        error!(
            event = "task_panicked",
            task.id = %task_id,
            task.name = task_name,
            panic = panic,
            "任务运行体崩溃，已恢复"
        );
    }

    pub fn log_upsert_ignored(project: &str, job_id: &str, node: &str) {
        debug!(
            event = "job_upsert_ignored",
            job.project = project,
            job.id = job_id,
            node = node,
            "作业状态时间戳不比已存储的值新，忽略写入"
        );
    }

    pub fn log_stats_miss(node: &str, project: &str, spider: &str, job_id: &str, reason: &str) {
        info!(
            event = "stats_miss",
            node = node,
            job.project = project,
            job.spider = spider,
            job.id = job_id,
            reason = reason,
            "日志统计中缺少该作业，使用降级写入"
        );
    }

    pub fn log_node_request_failed(node: &str, endpoint: &str, error: &str) {
        warn!(
            event = "node_request_failed",
            node = node,
            endpoint = endpoint,
            error = error,
            "节点请求失败"
        );
    }

    pub fn log_deploy_stage(project: &str, version: &str, stage: &str) {
        info!(
            event = "deploy_stage",
            deploy.project = project,
            deploy.version = version,
            deploy.stage = stage,
            "部署阶段推进"
        );
    }

    pub fn log_deploy_node_result(project: &str, node: &str, success: bool, detail: &str) {
        if success {
            info!(
                event = "deploy_node_result",
                deploy.project = project,
                node = node,
                success = success,
                detail = detail,
                "节点部署成功"
            );
        } else {
            warn!(
                event = "deploy_node_result",
                deploy.project = project,
                node = node,
                success = success,
                detail = detail,
                "节点部署失败"
            );
        }
    }

    pub fn log_worker_panic(component: &str, panic: &str) {
        error!(
            event = "worker_panic",
            component = component,
            panic = panic,
            "工作协程崩溃，已转换为错误结果"
        );
    }
}
