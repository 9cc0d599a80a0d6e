use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::{error::ApiResult, routes::AppState};

/// 把 `/{node}/scrapyd-backend/{*path}` 转发到节点，附带节点凭证
pub async fn proxy_to_node(
    State(state): State<AppState>,
    Path((node, path)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> ApiResult<Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    let proxied = state
        .cluster
        .proxy(
            &node,
            method,
            &path,
            query.as_deref(),
            content_type,
            body.to_vec(),
        )
        .await?;
    debug!("代理响应: 节点 {} 路径 {} 状态 {}", node, path, proxied.status);

    let status = StatusCode::from_u16(proxied.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, proxied.body).into_response();
    if let Some(content_type) = proxied
        .content_type
        .and_then(|value| value.parse().ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}
