use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    response::IntoResponse,
};
use fleet_core::models::{JobFilter, JobStatus};
use serde::Deserialize;

use crate::{
    error::ApiResult,
    middleware::Actor,
    response::{done, success, PaginatedResponse},
    routes::AppState,
};

/// 作业查询参数
#[derive(Debug, Deserialize)]
pub struct JobQueryParams {
    pub status: Option<JobStatus>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl JobQueryParams {
    fn into_filter(self, default_page_size: u32) -> JobFilter {
        JobFilter {
            status: self.status,
            search: self.search.filter(|term| !term.trim().is_empty()),
            page: self.page.unwrap_or(1).max(1),
            page_size: self
                .page_size
                .filter(|size| *size > 0)
                .unwrap_or(default_page_size)
                .min(500),
        }
    }
}

/// 节点作业列表，第一页会先与节点对账
pub async fn list_node_jobs(
    State(state): State<AppState>,
    Path(node): Path<String>,
    query: Result<Query<JobQueryParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = query?;
    let filter = params.into_filter(state.jobs_page_size);
    let page = state.cluster.node_jobs(&node, &filter).await?;
    Ok(success(PaginatedResponse::from(page)))
}

/// 立即对账并返回统计
pub async fn refresh_node_jobs(
    State(state): State<AppState>,
    Path(node): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.cluster.refresh_jobs(&node).await?))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.cluster.get_job(id).await?))
}

pub async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    actor: Actor,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.cluster.stop_job(id, actor.as_deref()).await?))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.cluster.delete_job(id).await?;
    Ok(done("作业已删除"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults_and_bounds() {
        let params = JobQueryParams {
            status: None,
            search: Some("  ".to_string()),
            page: None,
            page_size: None,
        };
        let filter = params.into_filter(50);
        assert_eq!(filter.page, 1);
        assert_eq!(filter.page_size, 50);
        assert_eq!(filter.search, None);

        let params = JobQueryParams {
            status: Some(JobStatus::Running),
            search: Some("books".to_string()),
            page: Some(0),
            page_size: Some(10_000),
        };
        let filter = params.into_filter(50);
        assert_eq!(filter.page, 1);
        assert_eq!(filter.page_size, 500);
        assert_eq!(filter.status, Some(JobStatus::Running));
        assert_eq!(filter.search.as_deref(), Some("books"));
    }
}
