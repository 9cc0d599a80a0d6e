#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fleet_core::{
    config::DeployConfig,
    traits::{ArtifactBuilder, JobStore, NodeDirectory, SchedulerEngine, TaskRepository},
};
use fleet_dispatcher::{
    ClusterService, CronEngine, DeployEvent, DeployOrchestrator, JobReconciler, TaskService,
};
use fleet_infrastructure::{AesGcmVault, DatabaseManager, NodeClient};
use tokio::sync::mpsc;

pub const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

/// 内存数据库 + 真实节点客户端 + 调度引擎
pub struct Harness {
    pub db: DatabaseManager,
    pub jobs: Arc<dyn JobStore>,
    pub tasks: Arc<dyn TaskRepository>,
    pub directory: Arc<dyn NodeDirectory>,
    pub client: NodeClient,
    pub engine: Arc<dyn SchedulerEngine>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_jobs(None).await
    }

    /// 可替换作业存储，用于注入故障
    pub async fn with_jobs(jobs: Option<Arc<dyn JobStore>>) -> Self {
        let db = DatabaseManager::in_memory().await.unwrap();
        let jobs = jobs.unwrap_or_else(|| Arc::new(db.job_store()));
        let tasks: Arc<dyn TaskRepository> = Arc::new(db.task_repository());
        let directory: Arc<dyn NodeDirectory> = Arc::new(db.node_directory());
        let client = NodeClient::new(
            directory.clone(),
            Arc::new(AesGcmVault::new()),
            SECRET,
            Duration::from_secs(5),
        )
        .unwrap();
        let engine: Arc<dyn SchedulerEngine> = Arc::new(CronEngine::new());

        Self {
            db,
            jobs,
            tasks,
            directory,
            client,
            engine,
        }
    }

    pub fn task_service(&self) -> TaskService {
        TaskService::new(
            self.tasks.clone(),
            self.jobs.clone(),
            self.client.clone(),
            self.engine.clone(),
        )
    }

    pub fn reconciler(&self) -> JobReconciler {
        JobReconciler::new(self.client.clone(), self.jobs.clone(), 4)
    }

    pub fn cluster(&self) -> ClusterService {
        ClusterService::new(
            self.client.clone(),
            self.jobs.clone(),
            Arc::new(AesGcmVault::new()),
            SECRET,
            Arc::new(self.reconciler()),
            4,
        )
    }

    pub fn orchestrator(
        &self,
        builder: Arc<dyn ArtifactBuilder>,
        build_timeout_seconds: u64,
    ) -> Arc<DeployOrchestrator> {
        let config = DeployConfig {
            build_timeout_seconds,
            worker_count: 2,
            ..Default::default()
        };
        Arc::new(DeployOrchestrator::new(self.client.clone(), builder, &config))
    }
}

/// 读取事件直到发送端关闭
pub async fn drain(mut events: mpsc::Receiver<DeployEvent>) -> Vec<DeployEvent> {
    let mut collected = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(10), events.recv()).await {
        collected.push(event);
    }
    collected
}
