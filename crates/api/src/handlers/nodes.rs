use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use fleet_core::models::NewNode;
use serde::Deserialize;

use crate::{
    error::ApiResult,
    response::{created, done, success},
    routes::AppState,
};

/// 凭证轮换请求，两项都为空时清除凭证
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.cluster.list_nodes().await?))
}

/// 节点状态面板，不可达的节点被省略
pub async fn node_statuses(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.cluster.node_statuses().await?))
}

pub async fn add_node(
    State(state): State<AppState>,
    payload: Result<Json<NewNode>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    Ok(created(state.cluster.add_node(request).await?))
}

pub async fn update_credentials(
    State(state): State<AppState>,
    Path(node): Path<String>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    state
        .cluster
        .update_credentials(&node, request.username, request.password)
        .await?;
    Ok(done("节点凭证已更新"))
}

pub async fn delete_node(
    State(state): State<AppState>,
    Path(node): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.cluster.delete_node(&node).await?;
    Ok(done("节点已删除"))
}

pub async fn list_projects(
    State(state): State<AppState>,
    Path(node): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.cluster.list_projects(&node).await?))
}

pub async fn list_spiders(
    State(state): State<AppState>,
    Path((node, project)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.cluster.list_spiders(&node, &project).await?))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path((node, project)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.cluster.list_versions(&node, &project).await?))
}
