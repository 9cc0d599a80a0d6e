//! # Fleet API
//!
//! 爬虫集群的 HTTP 接口层，基于 Axum 构建。
//!
//! ## API 端点
//!
//! ### 任务管理
//! - `GET /api/tasks?search=` / `POST /api/tasks` - 任务列表 / 创建任务
//! - `GET|PUT|DELETE /api/tasks/{id}` - 查询、编辑、删除任务
//! - `POST /api/tasks/{id}/pause` / `restart` / `run` - 暂停、恢复、立即触发
//! - `POST /api/tasks/bulk` - 批量触发、停止、删除
//! - `POST /api/spiders/fire` - 在多个节点上各运行一次 spider
//!
//! ### 节点与作业
//! - `GET|POST /api/nodes`、`GET /api/nodes/status` - 节点列表、注册、状态面板
//! - `GET /api/nodes/{node}/projects[/{project}/spiders|versions]` - 项目、爬虫、版本
//! - `GET /api/nodes/{node}/jobs?status=&search=&page=`、`POST /api/nodes/{node}/jobs/refresh` - 作业列表与对账
//! - `GET|DELETE /api/jobs/{id}`、`POST /api/jobs/{id}/stop` - 作业详情、删除、停止
//!
//! ### 部署
//! - `POST /api/deploy` - 校验并签发部署令牌
//! - `GET /api/deploy/execute?token=` - SSE 部署进度
//!
//! ### 其它
//! - `/{node}/scrapyd-backend/{*path}` - 节点反向代理
//! - `GET /health`、`GET /metrics`
//!
//! 请求头 `x-fleet-user` 作为操作者记录在任务和作业上。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::time::Duration;

use axum::{http::StatusCode, Router};
use fleet_core::config::{ApiConfig, ObservabilityConfig};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(
    state: AppState,
    api_config: &ApiConfig,
    observability: &ObservabilityConfig,
) -> Router {
    let router = create_routes(state, &observability.metrics_endpoint).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(request_timeout_layer(api_config))
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if api_config.cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    }
}

/// 超时的请求返回 408
fn request_timeout_layer(api_config: &ApiConfig) -> TimeoutLayer {
    TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(api_config.request_timeout_seconds),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_slow_request_times_out_with_408() {
        let config = ApiConfig {
            request_timeout_seconds: 0,
            ..ApiConfig::default()
        };
        let router = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .layer(request_timeout_layer(&config));

        let response = router
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
