//! 任务生命周期管理
//!
//! 持久化的任务记录与调度引擎中的注册通过任务ID关联。引擎注册表是“任务是否在运行”的
//! 唯一事实来源，存储中的 `paused` 标记在列表查询时按引擎状态修正。

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use fleet_core::{
    models::{BulkAction, SpiderArgs, Task, TaskDraft, TaskEdit, TaskSchedule},
    traits::{JobStore, NodeDirectory, SchedulerEngine, TaskRepository},
    validation::not_blank,
    FleetError, FleetResult,
};
use fleet_infrastructure::NodeClient;

use crate::cron_utils::CronSchedule;
use crate::task_runner::TaskRuntime;

/// 批量操作中单个任务的结果
#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome {
    pub id: Uuid,
    pub success: bool,
    pub error: Option<String>,
}

pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    jobs: Arc<dyn JobStore>,
    client: NodeClient,
    engine: Arc<dyn SchedulerEngine>,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        jobs: Arc<dyn JobStore>,
        client: NodeClient,
        engine: Arc<dyn SchedulerEngine>,
    ) -> Self {
        Self {
            tasks,
            jobs,
            client,
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<dyn SchedulerEngine> {
        &self.engine
    }

    fn nodes(&self) -> &Arc<dyn NodeDirectory> {
        self.client.directory()
    }

    /// 校验草稿并构造任务，不落库也不注册
    pub fn create(&self, draft: TaskDraft) -> FleetResult<Task> {
        not_blank("node", &draft.node)?;
        not_blank("project", &draft.project)?;
        not_blank("spider", &draft.spider)?;
        not_blank("name", &draft.name)?;
        if let Some(expr) = draft.schedule.cron_expression() {
            CronSchedule::validate(expr)?;
        }

        let mut task = Task::new(
            draft.name.trim(),
            draft.project.trim(),
            draft.spider.trim(),
            draft.node.trim(),
            draft.schedule,
            draft.args,
            draft.actor,
        );
        if let Some(id) = draft.id {
            task.id = id;
        }
        Ok(task)
    }

    /// 在引擎中注册任务，返回注册句柄（任务ID）
    pub async fn register(&self, task: &Task) -> FleetResult<Uuid> {
        let runtime = TaskRuntime::new(
            task.clone(),
            self.jobs.clone(),
            self.client.clone(),
            &self.engine,
        );
        self.engine.add(runtime.into_scheduled_job()).await?;
        Ok(task.id)
    }

    pub async fn update(&self, id: Uuid, schedule: TaskSchedule) -> FleetResult<()> {
        self.engine.update(id, schedule).await
    }

    /// 从引擎注销，任务不存在时视为成功
    pub async fn unregister(&self, id: Uuid) -> FleetResult<()> {
        match self.engine.remove(id).await {
            Err(FleetError::EngineJobNotFound { .. }) => {
                debug!("任务 {} 未在引擎中注册，跳过注销", id);
                Ok(())
            }
            other => other,
        }
    }

    pub async fn run_now(&self, id: Uuid) -> FleetResult<()> {
        self.engine.run_now(id).await
    }

    pub async fn is_live(&self, id: Uuid) -> bool {
        self.engine.contains(id).await
    }

    /// 校验、落库并注册周期任务；一次性任务只注册不落库
    #[instrument(skip(self, draft), fields(task.name = %draft.name, node = %draft.node))]
    pub async fn create_task(&self, draft: TaskDraft) -> FleetResult<Task> {
        let task = self.create(draft)?;
        self.nodes().get_node(&task.node).await?;

        if !task.is_one_shot() {
            self.tasks.create(&task).await?;
        }
        self.register(&task).await?;
        info!("任务已创建: {} ({})", task.name, task.id);
        Ok(task)
    }

    /// 在每个节点上各触发一次 spider，返回创建的一次性任务
    #[instrument(skip(self, args))]
    pub async fn fire_spider(
        &self,
        project: &str,
        spider: &str,
        nodes: &[String],
        args: SpiderArgs,
        actor: Option<String>,
    ) -> FleetResult<Vec<Task>> {
        if nodes.is_empty() {
            return Err(FleetError::validation("至少选择一个节点"));
        }
        for node in nodes {
            self.nodes().get_node(node).await?;
        }

        let mut fired = Vec::with_capacity(nodes.len());
        for node in nodes {
            let task = self.create(TaskDraft {
                id: None,
                name: format!("{spider}@{node}"),
                project: project.to_string(),
                spider: spider.to_string(),
                node: node.clone(),
                schedule: TaskSchedule::OneShot,
                args: args.clone(),
                actor: actor.clone(),
            })?;
            self.register(&task).await?;
            fired.push(task);
        }
        Ok(fired)
    }

    /// 列出任务（可按关键字过滤），并按引擎状态修正 `paused`
    pub async fn list_tasks(&self, search: Option<&str>) -> FleetResult<Vec<Task>> {
        let mut tasks = self.tasks.list(search).await?;
        for task in &mut tasks {
            self.sync_paused(task).await?;
        }
        Ok(tasks)
    }

    pub async fn get_task(&self, id: Uuid) -> FleetResult<Task> {
        let mut task = self.load(id).await?;
        self.sync_paused(&mut task).await?;
        Ok(task)
    }

    #[instrument(skip(self, edit))]
    pub async fn edit_task(&self, id: Uuid, edit: TaskEdit) -> FleetResult<Task> {
        let current = self.load(id).await?;
        let mut task = current.clone();

        if let Some(name) = edit.name {
            not_blank("name", &name)?;
            task.name = name.trim().to_string();
        }
        if let Some(project) = edit.project {
            not_blank("project", &project)?;
            task.project = project.trim().to_string();
        }
        if let Some(spider) = edit.spider {
            not_blank("spider", &spider)?;
            task.spider = spider.trim().to_string();
        }
        if let Some(node) = edit.node {
            not_blank("node", &node)?;
            let node = node.trim().to_string();
            self.nodes().get_node(&node).await?;
            task.node = node;
        }
        if let Some(cron) = edit.cron {
            CronSchedule::validate(&cron)?;
            task.schedule = TaskSchedule::Cron(cron.trim().to_string());
        }
        if let Some(args) = edit.args {
            task.args = args;
        }
        task.modified_by = edit.actor;
        task.updated_at = Utc::now();

        let live = self.is_live(id).await;
        task.paused = !live;
        self.tasks.update(&task).await?;

        if live {
            let only_schedule_changed = task.name == current.name
                && task.project == current.project
                && task.spider == current.spider
                && task.node == current.node
                && task.args == current.args;
            if only_schedule_changed {
                if task.schedule != current.schedule {
                    self.update(id, task.schedule.clone()).await?;
                }
            } else {
                self.register(&task).await?;
            }
        }
        Ok(task)
    }

    pub async fn pause_task(&self, id: Uuid) -> FleetResult<Task> {
        let mut task = self.load(id).await?;
        self.unregister(id).await?;
        self.tasks.set_paused(id, true).await?;
        task.paused = true;
        info!("任务已暂停: {}", task.name);
        Ok(task)
    }

    pub async fn restart_task(&self, id: Uuid) -> FleetResult<Task> {
        let mut task = self.load(id).await?;
        self.register(&task).await?;
        self.tasks.set_paused(id, false).await?;
        task.paused = false;
        info!("任务已恢复: {}", task.name);
        Ok(task)
    }

    pub async fn delete_task(&self, id: Uuid) -> FleetResult<()> {
        self.unregister(id).await?;
        if !self.tasks.delete(id).await? {
            return Err(FleetError::TaskNotFound { id });
        }
        info!("任务已删除: {}", id);
        Ok(())
    }

    pub async fn bulk(&self, action: BulkAction, ids: &[Uuid]) -> Vec<BulkOutcome> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for &id in ids {
            let result = match action {
                BulkAction::Fire => self.fire_now(id).await,
                BulkAction::Stop => self.pause_task(id).await.map(|_| ()),
                BulkAction::Delete => self.delete_task(id).await,
            };
            if let Err(e) = &result {
                warn!("批量操作 {:?} 对任务 {} 失败: {}", action, id, e);
            }
            outcomes.push(BulkOutcome {
                id,
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }
        outcomes
    }

    /// 启动时注册所有未暂停的任务，返回成功注册的数量
    pub async fn load_active_tasks(&self) -> FleetResult<usize> {
        let tasks = self.tasks.list_active().await?;
        let mut loaded = 0;
        for task in &tasks {
            match self.register(task).await {
                Ok(_) => loaded += 1,
                Err(e) => error!("加载任务 {} ({}) 失败: {}", task.name, task.id, e),
            }
        }
        info!("已加载 {}/{} 个活动任务", loaded, tasks.len());
        Ok(loaded)
    }

    /// 运行中的任务立即触发；已暂停的任务以一次性副本触发，不改变其暂停状态
    pub async fn fire_now(&self, id: Uuid) -> FleetResult<()> {
        if self.is_live(id).await {
            return self.run_now(id).await;
        }
        let task = self.load(id).await?;
        let once = self.create(TaskDraft {
            id: None,
            name: task.name.clone(),
            project: task.project.clone(),
            spider: task.spider.clone(),
            node: task.node.clone(),
            schedule: TaskSchedule::OneShot,
            args: task.args.clone(),
            actor: task.modified_by.clone().or(task.created_by.clone()),
        })?;
        self.register(&once).await.map(|_| ())
    }

    async fn load(&self, id: Uuid) -> FleetResult<Task> {
        self.tasks
            .get(id)
            .await?
            .ok_or(FleetError::TaskNotFound { id })
    }

    async fn sync_paused(&self, task: &mut Task) -> FleetResult<()> {
        let paused = !self.is_live(task.id).await;
        if task.paused != paused {
            debug!("修正任务 {} 的暂停状态: {} -> {}", task.id, task.paused, paused);
            self.tasks.set_paused(task.id, paused).await?;
            task.paused = paused;
        }
        Ok(())
    }
}
