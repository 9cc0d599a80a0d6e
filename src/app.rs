use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fleet_api::{create_app, AppState};
use fleet_core::{
    config::AppConfig,
    traits::{CredentialVault, JobStore, NodeDirectory, SchedulerEngine},
};
use fleet_dispatcher::{
    ClusterService, CronEngine, CronSchedule, DeployOrchestrator, JobReconciler, TaskService,
};
use fleet_infrastructure::{
    AesGcmVault, DatabaseManager, FleetMetrics, NodeClient, PythonEggBuilder,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

/// 主应用程序
pub struct Application {
    config: AppConfig,
    db: DatabaseManager,
    engine: Arc<dyn SchedulerEngine>,
    reconciler: Arc<JobReconciler>,
    state: AppState,
}

impl Application {
    /// 打开数据库并装配所有服务
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("连接数据库: {}", config.database.url);
        let db = DatabaseManager::new(&config.database).await?;

        let metrics = if config.observability.metrics_enabled {
            Some(install_metrics_recorder()?)
        } else {
            None
        };

        let directory: Arc<dyn NodeDirectory> = Arc::new(db.node_directory());
        let jobs: Arc<dyn JobStore> = Arc::new(db.job_store());
        let vault: Arc<dyn CredentialVault> = Arc::new(AesGcmVault::new());
        let secret = config.security.credential_secret.as_bytes();

        let client = NodeClient::new(
            directory,
            vault.clone(),
            secret,
            Duration::from_secs(config.scheduler.default_timeout_seconds),
        )?;

        let engine: Arc<dyn SchedulerEngine> = Arc::new(CronEngine::new());
        let reconciler = Arc::new(JobReconciler::new(
            client.clone(),
            jobs.clone(),
            config.scheduler.worker_count,
        ));

        let tasks = Arc::new(TaskService::new(
            Arc::new(db.task_repository()),
            jobs.clone(),
            client.clone(),
            engine.clone(),
        ));
        let cluster = Arc::new(ClusterService::new(
            client.clone(),
            jobs,
            vault,
            secret,
            reconciler.clone(),
            config.scheduler.worker_count,
        ));
        let deployer = Arc::new(DeployOrchestrator::new(
            client,
            Arc::new(PythonEggBuilder::new(&config.deploy.python_path)),
            &config.deploy,
        ));

        let state = AppState {
            tasks,
            cluster,
            deployer,
            metrics,
            jobs_page_size: config.scheduler.jobs_page_size,
        };

        Ok(Self {
            config,
            db,
            engine,
            reconciler,
            state,
        })
    }

    /// 恢复任务、启动周期对账和 HTTP 服务，直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let loaded = self.state.tasks.load_active_tasks().await?;
        info!("已恢复 {} 个周期任务", loaded);

        let reconcile_handle = self.spawn_reconcile_loop(shutdown_rx.resubscribe())?;

        let served = self.run_api(shutdown_rx).await;

        if let Some(handle) = reconcile_handle {
            if let Err(e) = handle.await {
                warn!("周期对账任务异常结束: {}", e);
            }
        }
        self.engine.shutdown().await;
        self.db.close().await;
        info!("调度引擎与数据库连接已关闭");

        served
    }

    fn spawn_reconcile_loop(
        &self,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Option<tokio::task::JoinHandle<()>>> {
        if !self.config.scheduler.reconcile_enabled {
            info!("周期对账已禁用");
            return Ok(None);
        }

        let schedule = CronSchedule::parse(&self.config.scheduler.reconcile_cron)
            .context("对账CRON表达式无效")?;
        let reconciler = Arc::clone(&self.reconciler);
        Ok(Some(tokio::spawn(
            reconciler.run_reconcile_loop(schedule, shutdown_rx),
        )))
    }

    async fn run_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let app = create_app(
            self.state.clone(),
            &self.config.api,
            &self.config.observability,
        );

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;

        info!("API服务器启动在 http://{}", self.config.api.bind_address);

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await
            .map_err(|e| {
                error!("API服务器运行失败: {}", e);
                anyhow::Error::from(e)
            })?;

        info!("API服务器已停止");
        Ok(())
    }
}

fn install_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("安装Prometheus指标记录器失败")?;
    FleetMetrics::describe();
    Ok(handle)
}
