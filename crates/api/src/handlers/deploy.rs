//! 部署接口
//!
//! 两步完成：`POST /api/deploy` 校验参数并返回签名令牌，
//! `GET /api/deploy/execute?token=...` 以 SSE 推送构建与各节点上传的进度。
//! 令牌放在查询参数里，浏览器的 EventSource 无法附加自定义请求头。

use std::convert::Infallible;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use fleet_core::models::DeployRequest;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::{
    error::ApiResult,
    response::success,
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ExecuteQuery {
    pub token: String,
}

pub async fn configure_deploy(
    State(state): State<AppState>,
    payload: Result<Json<DeployRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    Ok(success(state.deployer.configure(request).await?))
}

/// 执行部署，连接断开即取消尚未开始的阶段
pub async fn execute_deploy(
    State(state): State<AppState>,
    query: Result<Query<ExecuteQuery>, QueryRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Query(query) = query?;
    let session = state.deployer.open_session(&query.token)?;
    info!(
        "开始推送部署进度: 项目 {} 版本 {}",
        session.project, session.version
    );

    let events = ReceiverStream::new(state.deployer.start(session))
        .map(|event| Ok(Event::default().event(event.name).data(event.data)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
