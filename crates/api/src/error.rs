use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleet_core::FleetError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("集群错误: {0}")]
    Fleet(#[from] FleetError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, String, &'static str, Vec<String>) {
        match self {
            ApiError::Fleet(FleetError::TaskNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("任务 {id} 不存在"),
                "TASK_NOT_FOUND",
                vec!["使用 GET /api/tasks 查看所有任务".to_string()],
            ),
            ApiError::Fleet(FleetError::NodeNotFound { name }) => (
                StatusCode::NOT_FOUND,
                format!("节点 {name} 不存在"),
                "NODE_NOT_FOUND",
                vec!["使用 GET /api/nodes 查看已注册的节点".to_string()],
            ),
            ApiError::Fleet(FleetError::JobNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("作业 {id} 不存在"),
                "JOB_NOT_FOUND",
                vec!["作业可能已被删除，请刷新作业列表".to_string()],
            ),
            ApiError::Fleet(FleetError::EngineJobNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("任务 {id} 未在调度引擎中运行"),
                "TASK_NOT_RUNNING",
                vec!["使用 POST /api/tasks/{id}/restart 恢复任务".to_string()],
            ),
            ApiError::Fleet(FleetError::InvalidCron { expr, message }) => (
                StatusCode::BAD_REQUEST,
                format!("Cron表达式 '{expr}' 无效: {message}"),
                "INVALID_CRON_EXPRESSION",
                vec![
                    "请使用标准的5段或6段Cron表达式".to_string(),
                    "示例: '0 2 * * *' (每天凌晨2点执行)".to_string(),
                ],
            ),
            ApiError::Fleet(FleetError::Validation(message)) => (
                StatusCode::BAD_REQUEST,
                message.clone(),
                "VALIDATION_ERROR",
                vec!["请检查请求参数是否符合要求".to_string()],
            ),
            ApiError::Fleet(FleetError::InvalidToken(message)) => (
                StatusCode::UNAUTHORIZED,
                format!("部署令牌无效: {message}"),
                "INVALID_DEPLOY_TOKEN",
                vec!["令牌可能已过期，请重新调用 POST /api/deploy".to_string()],
            ),
            ApiError::Fleet(FleetError::Timeout(message)) => (
                StatusCode::GATEWAY_TIMEOUT,
                format!("操作超时: {message}"),
                "TIMEOUT",
                vec!["节点响应缓慢，请稍后重试".to_string()],
            ),
            ApiError::Fleet(err) if err.is_remote() => (
                StatusCode::BAD_GATEWAY,
                err.to_string(),
                "NODE_ERROR",
                vec![
                    "请检查节点是否在线".to_string(),
                    "使用 GET /api/nodes/status 查看节点状态".to_string(),
                ],
            ),
            ApiError::Fleet(err) => {
                error!("请求处理失败: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "系统内部错误".to_string(),
                    "INTERNAL_ERROR",
                    vec!["系统遇到内部错误，请稍后重试".to_string()],
                )
            }
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {message}"),
                "BAD_REQUEST",
                vec![
                    "请检查请求格式和参数".to_string(),
                    "确保Content-Type正确设置".to_string(),
                ],
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "请求的资源不存在".to_string(),
                "NOT_FOUND",
                vec!["请检查请求URL是否正确".to_string()],
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, error_type, suggestions) = self.parts();

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "suggestions": suggestions,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
