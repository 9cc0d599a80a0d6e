use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{FleetError, FleetResult};
use crate::models::TaskSchedule;

/// 回调执行时可见的作业上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub id: Uuid,
    pub name: String,
}

pub type RunFn = Arc<dyn Fn(JobContext) -> BoxFuture<'static, FleetResult<()>> + Send + Sync>;
pub type HookFn = Arc<dyn Fn(JobContext) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ErrorHookFn = Arc<dyn Fn(JobContext, FleetError) -> BoxFuture<'static, ()> + Send + Sync>;
pub type PanicHookFn = Arc<dyn Fn(JobContext, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// 作业生命周期回调
///
/// 每次触发的顺序为 `before_run` -> 运行体 -> 三个结束回调之一。
#[derive(Clone, Default)]
pub struct JobHooks {
    pub before_run: Option<HookFn>,
    pub after_success: Option<HookFn>,
    pub after_error: Option<ErrorHookFn>,
    pub after_panic: Option<PanicHookFn>,
}

impl fmt::Debug for JobHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHooks")
            .field("before_run", &self.before_run.is_some())
            .field("after_success", &self.after_success.is_some())
            .field("after_error", &self.after_error.is_some())
            .field("after_panic", &self.after_panic.is_some())
            .finish()
    }
}

/// 提交给调度引擎的作业
#[derive(Clone)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub name: String,
    pub schedule: TaskSchedule,
    pub run: RunFn,
    pub hooks: JobHooks,
}

impl ScheduledJob {
    pub fn context(&self) -> JobContext {
        JobContext {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

impl fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// 引擎中已注册作业的快照
#[derive(Debug, Clone, Serialize)]
pub struct EngineJobInfo {
    pub id: Uuid,
    pub name: String,
    pub schedule: TaskSchedule,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

/// 调度引擎接口
///
/// 引擎内部的注册表是“任务是否处于活动状态”的唯一事实来源。
///
/// # 线程安全
///
/// 所有方法都只需要 `&self`，可以被多个 HTTP 处理器并发调用，
/// 也可以在作业自身的回调中调用（例如一次性作业在结束回调里移除自己）。
/// 同一作业的多次触发串行执行。
#[async_trait]
pub trait SchedulerEngine: Send + Sync {
    /// 注册作业，已存在相同ID时替换原注册
    async fn add(&self, job: ScheduledJob) -> FleetResult<()>;

    /// 替换作业的调度方式，保留运行体和回调
    async fn update(&self, id: Uuid, schedule: TaskSchedule) -> FleetResult<()>;

    /// 移除作业，不存在时返回 `EngineJobNotFound`
    async fn remove(&self, id: Uuid) -> FleetResult<()>;

    /// 立即触发一次，不影响后续调度
    async fn run_now(&self, id: Uuid) -> FleetResult<()>;

    async fn contains(&self, id: Uuid) -> bool;

    async fn jobs(&self) -> Vec<EngineJobInfo>;

    /// 停止所有作业循环，不再接受新的触发
    async fn shutdown(&self);
}
