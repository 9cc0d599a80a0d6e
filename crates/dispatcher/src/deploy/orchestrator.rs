use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use fleet_core::{
    config::DeployConfig,
    logging::StructuredLogger,
    models::{DeployRequest, DeploySession, DeployTicket},
    traits::ArtifactBuilder,
    validation::{not_blank, sanitize_path},
    FleetError, FleetResult,
};
use fleet_infrastructure::{FleetMetrics, NodeClient};

use super::events::DeployEvent;
use super::token::DeployTokenService;
use crate::fan_out::FanOut;

/// 一次部署的结果汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploySummary {
    pub project: String,
    pub version: String,
    pub succeeded: usize,
    pub failed: usize,
}

/// 部署编排器
///
/// 持有集群级单飞锁：同一时刻只有一个部署在执行，后来者排队而不是被拒绝。
pub struct DeployOrchestrator {
    client: NodeClient,
    builder: Arc<dyn ArtifactBuilder>,
    tokens: DeployTokenService,
    lock: Mutex<()>,
    build_timeout: Duration,
    worker_count: usize,
}

impl DeployOrchestrator {
    pub fn new(
        client: NodeClient,
        builder: Arc<dyn ArtifactBuilder>,
        config: &DeployConfig,
    ) -> Self {
        Self {
            client,
            builder,
            tokens: DeployTokenService::new(&config.token_secret, config.token_ttl_seconds),
            lock: Mutex::new(()),
            build_timeout: Duration::from_secs(config.build_timeout_seconds),
            worker_count: config.worker_count,
        }
    }

    /// 校验部署参数并签发令牌
    #[instrument(skip(self, request), fields(project = %request.project))]
    pub async fn configure(&self, request: DeployRequest) -> FleetResult<DeployTicket> {
        not_blank("project", &request.project)?;

        let mut seen = BTreeSet::new();
        let nodes: Vec<String> = request
            .nodes
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty() && seen.insert(n.clone()))
            .collect();
        if nodes.is_empty() {
            return Err(FleetError::validation("至少选择一个部署节点"));
        }
        for node in &nodes {
            self.client.directory().get_node(node).await?;
        }

        let source_path = sanitize_path(&request.source_path)?;
        let session = DeploySession {
            project: request.project.trim().to_string(),
            source_path,
            version: Uuid::now_v7().to_string(),
            nodes,
        };
        let token = self.tokens.issue(&session)?;

        info!(
            "部署已配置: 项目 {} 版本 {} 节点 {:?}",
            session.project, session.version, session.nodes
        );
        Ok(DeployTicket { token, session })
    }

    /// 校验令牌并还原部署会话
    pub fn open_session(&self, token: &str) -> FleetResult<DeploySession> {
        self.tokens.verify(token)
    }

    /// 在后台执行部署，返回进度事件流
    ///
    /// 接收端被丢弃视为客户端断开：未开始的构建和上传会被取消。
    pub fn start(self: &Arc<Self>, session: DeploySession) -> mpsc::Receiver<DeployEvent> {
        let (tx, rx) = mpsc::channel(session.nodes.len() + 4);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.execute(session, tx).await {
                error!("部署执行失败: {}", e);
            }
        });
        rx
    }

    /// 单飞执行：构建一次，扇出上传到所有节点
    #[instrument(skip(self, session, events), fields(project = %session.project, version = %session.version))]
    pub async fn execute(
        &self,
        session: DeploySession,
        events: mpsc::Sender<DeployEvent>,
    ) -> FleetResult<DeploySummary> {
        let _guard = match self.lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let _ = events.send(DeployEvent::locked()).await;
                tokio::select! {
                    guard = self.lock.lock() => guard,
                    _ = events.closed() => {
                        info!("客户端在排队期间断开，放弃部署");
                        FleetMetrics::record_deployment("cancelled");
                        return Err(FleetError::Internal("客户端已断开".to_string()));
                    }
                }
            }
        };

        let project = session.project.clone();
        let version = session.version.clone();

        StructuredLogger::log_deploy_stage(&project, &version, "build");
        let build = tokio::time::timeout(
            self.build_timeout,
            self.builder.build(&session.source_path),
        );
        let built = tokio::select! {
            built = build => built,
            _ = events.closed() => {
                info!("客户端已断开，取消构建");
                FleetMetrics::record_deployment("cancelled");
                return Err(FleetError::Internal("客户端已断开".to_string()));
            }
        };
        let egg = match built {
            Ok(Ok(egg)) => egg,
            Ok(Err(e)) => return self.fail_build(&events, e).await,
            Err(_) => {
                let e = FleetError::Timeout(format!(
                    "构建超过 {} 秒未完成",
                    self.build_timeout.as_secs()
                ));
                return self.fail_build(&events, e).await;
            }
        };

        if events.is_closed() {
            info!("客户端已断开，跳过上传");
            FleetMetrics::record_deployment("cancelled");
            return Err(FleetError::Internal("客户端已断开".to_string()));
        }

        StructuredLogger::log_deploy_stage(&project, &version, "upload");
        let egg: Arc<[u8]> = Arc::from(egg);
        let client = self.client.clone();
        let (upload_project, upload_version) = (project.clone(), version.clone());
        let mut batch = FanOut::spawn(session.nodes.clone(), self.worker_count, move |node: String| {
            let client = client.clone();
            let egg = egg.clone();
            let project = upload_project.clone();
            let version = upload_version.clone();
            async move {
                client
                    .add_version(&node, &project, &version, egg.to_vec())
                    .await
            }
        });

        let (mut succeeded, mut failed) = (0, 0);
        while let Some(outcome) = batch.next().await {
            let event = match &outcome.result {
                Ok(response) => {
                    succeeded += 1;
                    StructuredLogger::log_deploy_node_result(
                        &project,
                        &outcome.item,
                        true,
                        &format!("{} spiders", response.spiders),
                    );
                    DeployEvent::node_success(&outcome.item, response.spiders)
                }
                Err(e) => {
                    failed += 1;
                    StructuredLogger::log_deploy_node_result(
                        &project,
                        &outcome.item,
                        false,
                        &e.to_string(),
                    );
                    DeployEvent::node_failure(&outcome.item, &e.to_string())
                }
            };
            if events.send(event).await.is_err() {
                batch.cancel();
            }
        }
        batch.join().await;

        StructuredLogger::log_deploy_stage(&project, &version, "complete");
        let _ = events
            .send(DeployEvent::complete(&project, &version, succeeded, failed))
            .await;
        FleetMetrics::record_deployment(if failed == 0 { "success" } else { "partial" });

        Ok(DeploySummary {
            project,
            version,
            succeeded,
            failed,
        })
    }

    async fn fail_build(
        &self,
        events: &mpsc::Sender<DeployEvent>,
        err: FleetError,
    ) -> FleetResult<DeploySummary> {
        warn!("构建失败，终止部署: {}", err);
        FleetMetrics::record_deployment("build_failed");
        let _ = events.send(DeployEvent::build_error(&err.to_string())).await;
        Err(err)
    }
}
