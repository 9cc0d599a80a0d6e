use std::sync::Arc;

use axum::{
    routing::{any, get, post, put},
    Router,
};
use fleet_dispatcher::{ClusterService, DeployOrchestrator, TaskService};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::{
    deploy::{configure_deploy, execute_deploy},
    health::health_check,
    jobs::{delete_job, get_job, list_node_jobs, refresh_node_jobs, stop_job},
    metrics::render_metrics,
    nodes::{
        add_node, delete_node, list_nodes, list_projects, list_spiders, list_versions,
        node_statuses, update_credentials,
    },
    proxy::proxy_to_node,
    tasks::{
        bulk_tasks, create_task, delete_task, fire_spider, get_task, list_tasks, pause_task,
        restart_task, run_task, update_task,
    },
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub tasks: Arc<TaskService>,
    pub cluster: Arc<ClusterService>,
    pub deployer: Arc<DeployOrchestrator>,
    pub metrics: Option<PrometheusHandle>,
    pub jobs_page_size: u32,
}

/// 创建API路由
pub fn create_routes(state: AppState, metrics_endpoint: &str) -> Router {
    let mut router = Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 任务管理API
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/bulk", post(bulk_tasks))
        .route(
            "/api/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/pause", post(pause_task))
        .route("/api/tasks/{id}/restart", post(restart_task))
        .route("/api/tasks/{id}/run", post(run_task))
        .route("/api/spiders/fire", post(fire_spider))
        // 节点管理API
        .route("/api/nodes", get(list_nodes).post(add_node))
        .route("/api/nodes/status", get(node_statuses))
        .route("/api/nodes/{node}", axum::routing::delete(delete_node))
        .route("/api/nodes/{node}/credentials", put(update_credentials))
        .route("/api/nodes/{node}/projects", get(list_projects))
        .route(
            "/api/nodes/{node}/projects/{project}/spiders",
            get(list_spiders),
        )
        .route(
            "/api/nodes/{node}/projects/{project}/versions",
            get(list_versions),
        )
        // 作业API
        .route("/api/nodes/{node}/jobs", get(list_node_jobs))
        .route("/api/nodes/{node}/jobs/refresh", post(refresh_node_jobs))
        .route("/api/jobs/{id}", get(get_job).delete(delete_job))
        .route("/api/jobs/{id}/stop", post(stop_job))
        // 部署API
        .route("/api/deploy", post(configure_deploy))
        .route("/api/deploy/execute", get(execute_deploy))
        // 节点反向代理
        .route("/{node}/scrapyd-backend/{*path}", any(proxy_to_node));

    if state.metrics.is_some() {
        router = router.route(metrics_endpoint, get(render_metrics));
    }

    router.with_state(state)
}
