//! 基于 cron 的进程内调度引擎
//!
//! 每个注册的作业由一个独立的 tokio 任务驱动：按 cron 表达式睡眠到下一次执行时间，
//! 或者在 `run_now` 时被唤醒。同一作业的触发串行执行；一次性作业注册后立即触发一次。

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fleet_core::{
    logging::StructuredLogger,
    models::TaskSchedule,
    traits::{EngineJobInfo, ScheduledJob, SchedulerEngine},
    FleetError, FleetResult,
};

use crate::cron_utils::CronSchedule;
use crate::fan_out::panic_message;

struct Registration {
    job: ScheduledJob,
    cron: Option<CronSchedule>,
    stop: watch::Sender<bool>,
    trigger: Arc<Notify>,
    last_run: Arc<RwLock<Option<DateTime<Utc>>>>,
    handle: JoinHandle<()>,
}

impl Registration {
    fn signal_stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// 默认的调度引擎实现
pub struct CronEngine {
    registry: RwLock<HashMap<Uuid, Registration>>,
    closed: AtomicBool,
}

impl Default for CronEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CronEngine {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn parse_schedule(schedule: &TaskSchedule) -> FleetResult<Option<CronSchedule>> {
        schedule.cron_expression().map(CronSchedule::parse).transpose()
    }

    fn describe(schedule: &TaskSchedule) -> &str {
        schedule.cron_expression().unwrap_or("one-shot")
    }
}

#[async_trait]
impl SchedulerEngine for CronEngine {
    async fn add(&self, job: ScheduledJob) -> FleetResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FleetError::Internal("调度引擎已关闭".to_string()));
        }
        let cron = Self::parse_schedule(&job.schedule)?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let trigger = Arc::new(Notify::new());
        let last_run = Arc::new(RwLock::new(None));

        // 持有写锁期间启动循环，一次性作业在回调中移除自己时注册必然已经可见
        let mut registry = self.registry.write().await;
        let handle = tokio::spawn(drive(
            job.clone(),
            cron.clone(),
            stop_rx,
            trigger.clone(),
            last_run.clone(),
        ));
        let previous = registry.insert(
            job.id,
            Registration {
                job: job.clone(),
                cron,
                stop: stop_tx,
                trigger,
                last_run,
                handle,
            },
        );
        drop(registry);

        if let Some(previous) = previous {
            debug!("替换已存在的作业注册: {}", job.id);
            previous.signal_stop();
        }

        StructuredLogger::log_task_registered(job.id, &job.name, Self::describe(&job.schedule));
        Ok(())
    }

    async fn update(&self, id: Uuid, schedule: TaskSchedule) -> FleetResult<()> {
        Self::parse_schedule(&schedule)?;
        let mut job = {
            let registry = self.registry.read().await;
            registry
                .get(&id)
                .map(|r| r.job.clone())
                .ok_or(FleetError::EngineJobNotFound { id })?
        };
        job.schedule = schedule;
        self.add(job).await
    }

    async fn remove(&self, id: Uuid) -> FleetResult<()> {
        let removed = self.registry.write().await.remove(&id);
        match removed {
            Some(registration) => {
                registration.signal_stop();
                StructuredLogger::log_task_unregistered(id, &registration.job.name);
                Ok(())
            }
            None => Err(FleetError::EngineJobNotFound { id }),
        }
    }

    async fn run_now(&self, id: Uuid) -> FleetResult<()> {
        let registry = self.registry.read().await;
        let registration = registry
            .get(&id)
            .ok_or(FleetError::EngineJobNotFound { id })?;
        registration.trigger.notify_one();
        Ok(())
    }

    async fn contains(&self, id: Uuid) -> bool {
        self.registry.read().await.contains_key(&id)
    }

    async fn jobs(&self) -> Vec<EngineJobInfo> {
        let now = Utc::now();
        let registry = self.registry.read().await;
        let mut jobs = Vec::with_capacity(registry.len());
        for registration in registry.values() {
            jobs.push(EngineJobInfo {
                id: registration.job.id,
                name: registration.job.name.clone(),
                schedule: registration.job.schedule.clone(),
                next_run: registration.cron.as_ref().and_then(|c| c.next_after(now)),
                last_run: *registration.last_run.read().await,
            });
        }
        jobs.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        jobs
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<Registration> = self
            .registry
            .write()
            .await
            .drain()
            .map(|(_, registration)| registration)
            .collect();

        info!("停止调度引擎，{} 个作业待退出", drained.len());
        let mut handles = Vec::with_capacity(drained.len());
        for registration in drained {
            registration.signal_stop();
            handles.push(registration.handle);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                StructuredLogger::log_worker_panic("cron_engine", &e.to_string());
            }
        }
    }
}

/// 单个作业的调度循环
async fn drive(
    job: ScheduledJob,
    cron: Option<CronSchedule>,
    mut stop: watch::Receiver<bool>,
    trigger: Arc<Notify>,
    last_run: Arc<RwLock<Option<DateTime<Utc>>>>,
) {
    if cron.is_none() {
        fire(&job, &last_run).await;
    }

    let mut last_target: Option<DateTime<Utc>> = None;
    loop {
        if *stop.borrow() {
            break;
        }

        let next = cron.as_ref().and_then(|c| {
            let now = Utc::now();
            let from = last_target.map_or(now, |t| t.max(now));
            c.next_after(from)
        });
        let sleep = async {
            match next {
                Some(at) => {
                    let wait = (at - Utc::now()).to_std().unwrap_or_default();
                    tokio::time::sleep(wait).await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = trigger.notified() => {
                debug!("作业 {} 被手动触发", job.id);
            }
            _ = sleep => {
                last_target = next;
            }
        }

        fire(&job, &last_run).await;
    }
    debug!("作业 {} 的调度循环已退出", job.id);
}

/// 依次执行 before_run、运行体和对应的结束回调
async fn fire(job: &ScheduledJob, last_run: &RwLock<Option<DateTime<Utc>>>) {
    *last_run.write().await = Some(Utc::now());
    let ctx = job.context();

    let before = job.hooks.before_run.clone();
    let run = job.run.clone();
    let body_ctx = ctx.clone();
    let body = async move {
        if let Some(before) = before {
            before(body_ctx.clone()).await;
        }
        run(body_ctx).await
    };

    match AssertUnwindSafe(body).catch_unwind().await {
        Ok(Ok(())) => {
            if let Some(hook) = &job.hooks.after_success {
                guarded(job, hook(ctx)).await;
            }
        }
        Ok(Err(err)) => match &job.hooks.after_error {
            Some(hook) => guarded(job, hook(ctx, err)).await,
            None => warn!("作业 {} 执行失败: {}", job.name, err),
        },
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            match &job.hooks.after_panic {
                Some(hook) => guarded(job, hook(ctx, message)).await,
                None => StructuredLogger::log_task_panicked(job.id, &job.name, &message),
            }
        }
    }
}

/// 结束回调自身的 panic 不能终止调度循环
async fn guarded<F>(job: &ScheduledJob, hook: F)
where
    F: Future<Output = ()> + Send,
{
    if let Err(panic) = AssertUnwindSafe(hook).catch_unwind().await {
        StructuredLogger::log_task_panicked(job.id, &job.name, &panic_message(panic.as_ref()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::traits::{JobContext, JobHooks, RunFn};
    use fleet_testing_utils::TestEnv;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn job(schedule: TaskSchedule, run: RunFn, hooks: JobHooks) -> ScheduledJob {
        ScheduledJob {
            id: Uuid::new_v4(),
            name: "ticker".to_string(),
            schedule,
            run,
            hooks,
        }
    }

    fn counting_run(counter: Arc<AtomicUsize>) -> RunFn {
        Arc::new(move |_ctx: JobContext| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    const YEARLY: &str = "0 0 0 1 1 *";

    #[tokio::test]
    async fn test_one_shot_fires_immediately() {
        let engine = CronEngine::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let successes = Arc::new(AtomicUsize::new(0));

        let s = successes.clone();
        let hooks = JobHooks {
            after_success: Some(Arc::new(move |_ctx: JobContext| {
                let s = s.clone();
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            })),
            ..Default::default()
        };
        let once = job(TaskSchedule::OneShot, counting_run(runs.clone()), hooks);
        engine.add(once).await.unwrap();

        let fired = TestEnv::wait_for(
            || {
                let s = successes.clone();
                async move { s.load(Ordering::SeqCst) == 1 }
            },
            Duration::from_secs(2),
        )
        .await;
        assert!(fired);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_recurring_job_fires_on_schedule() {
        let engine = CronEngine::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let every_second = job(
            TaskSchedule::Cron("* * * * * *".to_string()),
            counting_run(runs.clone()),
            JobHooks::default(),
        );
        let id = every_second.id;
        engine.add(every_second).await.unwrap();

        let fired_twice = TestEnv::wait_for(
            || {
                let r = runs.clone();
                async move { r.load(Ordering::SeqCst) >= 2 }
            },
            Duration::from_secs(4),
        )
        .await;
        assert!(fired_twice);

        let info = engine.jobs().await;
        assert_eq!(info.len(), 1);
        assert!(info[0].last_run.is_some());
        assert!(info[0].next_run.is_some());

        engine.remove(id).await.unwrap();
        let after_remove = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(runs.load(Ordering::SeqCst) <= after_remove + 1);
    }

    #[tokio::test]
    async fn test_error_and_panic_are_routed_to_hooks() {
        let engine = CronEngine::new();
        let errors = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));
        let panics = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));

        let e = errors.clone();
        let p = panics.clone();
        let hooks = JobHooks {
            after_error: Some(Arc::new(move |_ctx: JobContext, err: FleetError| {
                let e = e.clone();
                async move { e.lock().await.push(err.to_string()) }.boxed()
            })),
            after_panic: Some(Arc::new(move |_ctx: JobContext, msg: String| {
                let p = p.clone();
                async move { p.lock().await.push(msg) }.boxed()
            })),
            ..Default::default()
        };

        let failing: RunFn = Arc::new(|_ctx: JobContext| {
            async { Err::<(), _>(FleetError::Build("no setup.py".to_string())) }.boxed()
        });
        engine
            .add(job(TaskSchedule::OneShot, failing, hooks.clone()))
            .await
            .unwrap();

        let panicking: RunFn = Arc::new(|_ctx: JobContext| {
            async {
                let crashed: Option<()> = None;
                crashed.expect("spider crashed");
                Ok(())
            }
            .boxed()
        });
        engine
            .add(job(TaskSchedule::OneShot, panicking, hooks))
            .await
            .unwrap();

        let done = TestEnv::wait_for(
            || {
                let (e, p) = (errors.clone(), panics.clone());
                async move { e.lock().await.len() == 1 && p.lock().await.len() == 1 }
            },
            Duration::from_secs(2),
        )
        .await;
        assert!(done);
        assert!(errors.lock().await[0].contains("no setup.py"));
        assert!(panics.lock().await[0].contains("spider crashed"));
    }

    #[tokio::test]
    async fn test_run_now_update_and_remove() {
        let engine = CronEngine::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let yearly = job(
            TaskSchedule::Cron(YEARLY.to_string()),
            counting_run(runs.clone()),
            JobHooks::default(),
        );
        let id = yearly.id;
        engine.add(yearly).await.unwrap();
        assert!(engine.contains(id).await);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        engine.run_now(id).await.unwrap();
        let fired = TestEnv::wait_for(
            || {
                let r = runs.clone();
                async move { r.load(Ordering::SeqCst) == 1 }
            },
            Duration::from_secs(2),
        )
        .await;
        assert!(fired);

        engine
            .update(id, TaskSchedule::Cron("0 0 12 * * *".to_string()))
            .await
            .unwrap();
        let info = engine.jobs().await;
        assert_eq!(
            info[0].schedule,
            TaskSchedule::Cron("0 0 12 * * *".to_string())
        );

        let err = engine
            .update(id, TaskSchedule::Cron("bogus".to_string()))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(engine.contains(id).await);

        engine.remove(id).await.unwrap();
        assert!(!engine.contains(id).await);
        assert!(matches!(
            engine.remove(id).await,
            Err(FleetError::EngineJobNotFound { .. })
        ));
        assert!(matches!(
            engine.run_now(id).await,
            Err(FleetError::EngineJobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_add_replaces_and_shutdown_closes() {
        let engine = CronEngine::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let first = job(
            TaskSchedule::Cron(YEARLY.to_string()),
            counting_run(runs.clone()),
            JobHooks::default(),
        );
        let mut second = first.clone();
        second.name = "renamed".to_string();

        engine.add(first).await.unwrap();
        engine.add(second).await.unwrap();
        let info = engine.jobs().await;
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].name, "renamed");

        engine.shutdown().await;
        assert!(engine.jobs().await.is_empty());
        let late = job(TaskSchedule::OneShot, counting_run(runs), JobHooks::default());
        assert!(engine.add(late).await.is_err());
    }
}
