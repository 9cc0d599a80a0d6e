//! 任务触发逻辑
//!
//! [`TaskRuntime`] 把一个 [`Task`] 包装成调度引擎可执行的 [`ScheduledJob`]：
//!
//! 1. `before_run` 生成确定性的作业ID并写入参数集合的 `jobid`
//! 2. 运行体写入 `scheduled` 作业记录，然后调用节点的 schedule.json
//! 3. `after_success` / `after_error` / `after_panic` 记录结果，一次性任务在此注销自己

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use fleet_core::{
    logging::StructuredLogger,
    models::{encode_error_payload, JobKey, JobUpsert, SpiderArgs, Task},
    traits::{JobContext, JobHooks, JobStore, ScheduledJob, SchedulerEngine},
    FleetError, FleetResult,
};
use fleet_infrastructure::{FleetMetrics, NodeClient};

/// 由 before_run 写入、运行体和结束回调读取的触发状态
#[derive(Debug)]
struct FireState {
    job_id: Option<String>,
    fired_at: Option<DateTime<Utc>>,
    args: SpiderArgs,
}

pub struct TaskRuntime {
    task: Task,
    state: Mutex<FireState>,
    jobs: Arc<dyn JobStore>,
    client: NodeClient,
    engine: Weak<dyn SchedulerEngine>,
}

impl TaskRuntime {
    pub fn new(
        task: Task,
        jobs: Arc<dyn JobStore>,
        client: NodeClient,
        engine: &Arc<dyn SchedulerEngine>,
    ) -> Arc<Self> {
        let args = task.args.clone();
        Arc::new(Self {
            task,
            state: Mutex::new(FireState {
                job_id: None,
                fired_at: None,
                args,
            }),
            jobs,
            client,
            engine: Arc::downgrade(engine),
        })
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// 最近一次触发生成的作业ID
    pub async fn current_job_id(&self) -> Option<String> {
        self.state.lock().await.job_id.clone()
    }

    pub fn into_scheduled_job(self: Arc<Self>) -> ScheduledJob {
        let before = self.clone();
        let run = self.clone();
        let success = self.clone();
        let failure = self.clone();
        let panicked = self.clone();

        ScheduledJob {
            id: self.task.id,
            name: self.task.name.clone(),
            schedule: self.task.schedule.clone(),
            run: Arc::new(move |_ctx: JobContext| {
                let runtime = run.clone();
                async move { runtime.run().await }.boxed()
            }),
            hooks: JobHooks {
                before_run: Some(Arc::new(move |_ctx: JobContext| {
                    let runtime = before.clone();
                    async move { runtime.before_run().await }.boxed()
                })),
                after_success: Some(Arc::new(move |_ctx: JobContext| {
                    let runtime = success.clone();
                    async move { runtime.after_success().await }.boxed()
                })),
                after_error: Some(Arc::new(move |_ctx: JobContext, err: FleetError| {
                    let runtime = failure.clone();
                    async move { runtime.after_error(err).await }.boxed()
                })),
                after_panic: Some(Arc::new(move |_ctx: JobContext, panic: String| {
                    let runtime = panicked.clone();
                    async move { runtime.after_panic(panic).await }.boxed()
                })),
            },
        }
    }

    async fn before_run(&self) {
        let fired_at = Utc::now();
        let job_id = self.task.make_job_id(fired_at);

        let mut state = self.state.lock().await;
        state.args.set("jobid", job_id.clone());
        state.job_id = Some(job_id.clone());
        state.fired_at = Some(fired_at);
        drop(state);

        StructuredLogger::log_task_fired(self.task.id, &self.task.node, &job_id, fired_at);
    }

    async fn run(&self) -> FleetResult<()> {
        let (job_id, fired_at, args) = {
            let state = self.state.lock().await;
            let job_id = state
                .job_id
                .clone()
                .ok_or_else(|| FleetError::Internal("触发前未生成作业ID".to_string()))?;
            (job_id, state.fired_at.unwrap_or_else(Utc::now), state.args.clone())
        };

        let task = &self.task;
        let key = JobKey::new(&task.project, &job_id, &task.node);
        let (task_id, started_by) = if task.is_one_shot() {
            (None, task.created_by.clone())
        } else {
            (Some(task.id), None)
        };
        let record = JobUpsert::scheduled(key, &task.spider, task_id, started_by, fired_at);
        self.jobs.upsert_job(&record).await?;

        let response = self
            .client
            .schedule(&task.node, &task.project, &task.spider, &args)
            .await?;
        debug!(
            "节点 {} 已接受作业 {} (返回ID: {:?})",
            task.node, job_id, response.jobid
        );
        Ok(())
    }

    async fn after_success(&self) {
        FleetMetrics::record_task_fire("success");
        info!(
            task.id = %self.task.id,
            node = %self.task.node,
            "任务 {} 已在节点上调度",
            self.task.name
        );
        self.cleanup_one_shot().await;
    }

    async fn after_error(&self, err: FleetError) {
        FleetMetrics::record_task_fire("error");
        let job_id = self.current_job_id().await.unwrap_or_default();
        StructuredLogger::log_task_failed(self.task.id, &self.task.node, &job_id, &err.to_string());

        if !job_id.is_empty() {
            let key = JobKey::new(&self.task.project, &job_id, &self.task.node);
            match self
                .jobs
                .set_job_error(&key, &encode_error_payload(&err.to_string()))
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!("作业记录 {} 不存在，错误信息未保存", key),
                Err(e) => error!("保存作业 {} 的错误信息失败: {}", key, e),
            }
        }

        self.cleanup_one_shot().await;
    }

    async fn after_panic(&self, panic: String) {
        FleetMetrics::record_task_fire("panic");
        StructuredLogger::log_task_panicked(self.task.id, &self.task.name, &panic);
        self.cleanup_one_shot().await;
    }

    /// 一次性任务执行一次后从引擎中注销
    async fn cleanup_one_shot(&self) {
        if !self.task.is_one_shot() {
            return;
        }
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        match engine.remove(self.task.id).await {
            Ok(()) | Err(FleetError::EngineJobNotFound { .. }) => {}
            Err(e) => warn!("注销一次性任务 {} 失败: {}", self.task.id, e),
        }
    }
}
