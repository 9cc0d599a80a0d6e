use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    response::IntoResponse,
    Json,
};
use fleet_core::{
    models::{BulkAction, SpiderArgs, TaskDraft, TaskEdit, TaskSchedule},
    FleetError,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiResult,
    middleware::Actor,
    response::{created, done, success},
    routes::AppState,
};

/// 任务创建请求
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub project: String,
    pub spider: String,
    pub node: String,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub one_shot: bool,
    #[serde(default)]
    pub args: SpiderArgs,
}

impl CreateTaskRequest {
    fn into_draft(self, actor: Option<String>) -> Result<TaskDraft, FleetError> {
        let schedule = match (self.one_shot, self.cron) {
            (true, _) => TaskSchedule::OneShot,
            (false, Some(cron)) => TaskSchedule::Cron(cron),
            (false, None) => {
                return Err(FleetError::validation("周期任务必须提供 cron 表达式"))
            }
        };
        Ok(TaskDraft {
            id: self.id,
            name: self.name,
            project: self.project,
            spider: self.spider,
            node: self.node,
            schedule,
            args: self.args,
            actor,
        })
    }
}

/// 任务更新请求，未提供的字段保持不变
#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub name: Option<String>,
    pub project: Option<String>,
    pub spider: Option<String>,
    pub node: Option<String>,
    pub cron: Option<String>,
    pub args: Option<SpiderArgs>,
}

/// 批量操作请求
#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub action: BulkAction,
    pub ids: Vec<Uuid>,
}

/// 立即在多个节点上运行 spider
#[derive(Debug, Deserialize)]
pub struct FireSpiderRequest {
    pub project: String,
    pub spider: String,
    pub nodes: Vec<String>,
    #[serde(default)]
    pub args: SpiderArgs,
}

pub async fn create_task(
    State(state): State<AppState>,
    actor: Actor,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let draft = request.into_draft(actor.into_inner())?;
    let task = state.tasks.create_task(draft).await?;
    Ok(created(task))
}

/// 任务查询参数
#[derive(Debug, Deserialize)]
pub struct TaskQueryParams {
    pub search: Option<String>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    query: Result<Query<TaskQueryParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = query?;
    Ok(success(state.tasks.list_tasks(params.search.as_deref()).await?))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.tasks.get_task(id).await?))
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: Actor,
    payload: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let edit = TaskEdit {
        name: request.name,
        project: request.project,
        spider: request.spider,
        node: request.node,
        cron: request.cron,
        args: request.args,
        actor: actor.into_inner(),
    };
    Ok(success(state.tasks.edit_task(id, edit).await?))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.tasks.delete_task(id).await?;
    Ok(done("任务已删除"))
}

pub async fn pause_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.tasks.pause_task(id).await?))
}

pub async fn restart_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.tasks.restart_task(id).await?))
}

/// 立即触发一次，已暂停的任务保持暂停
pub async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.tasks.fire_now(id).await?;
    Ok(done("任务已触发"))
}

pub async fn bulk_tasks(
    State(state): State<AppState>,
    payload: Result<Json<BulkRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    Ok(success(state.tasks.bulk(request.action, &request.ids).await))
}

pub async fn fire_spider(
    State(state): State<AppState>,
    actor: Actor,
    payload: Result<Json<FireSpiderRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let fired = state
        .tasks
        .fire_spider(
            &request.project,
            &request.spider,
            &request.nodes,
            request.args,
            actor.into_inner(),
        )
        .await?;
    Ok(created(fired))
}
