//! 集群视图与节点管理
//!
//! 节点状态面板、节点注册与凭证轮换、项目/爬虫/版本查询、作业列表与停止。

use std::sync::Arc;

use tracing::{info, instrument, warn};
use url::Url;

use fleet_core::{
    models::{Job, JobFilter, JobPage, NewNode, Node, NodeStatus},
    traits::{CredentialVault, JobStore, NodeDirectory},
    validation::{self, not_blank},
    FleetError, FleetResult,
};
use fleet_infrastructure::{node_client::Method, NodeClient, ProxyResponse};

use crate::fan_out::fan_out;
use crate::reconciler::{JobReconciler, ReconcileReport};

pub struct ClusterService {
    client: NodeClient,
    jobs: Arc<dyn JobStore>,
    vault: Arc<dyn CredentialVault>,
    secret: Arc<[u8]>,
    reconciler: Arc<JobReconciler>,
    worker_count: usize,
}

impl ClusterService {
    pub fn new(
        client: NodeClient,
        jobs: Arc<dyn JobStore>,
        vault: Arc<dyn CredentialVault>,
        secret: impl AsRef<[u8]>,
        reconciler: Arc<JobReconciler>,
        worker_count: usize,
    ) -> Self {
        Self {
            client,
            jobs,
            vault,
            secret: Arc::from(secret.as_ref()),
            reconciler,
            worker_count,
        }
    }

    fn nodes(&self) -> &Arc<dyn NodeDirectory> {
        self.client.directory()
    }

    /// 并发查询所有节点的守护进程状态，失败的节点只记录日志不出现在结果中
    pub async fn node_statuses(&self) -> FleetResult<Vec<NodeStatus>> {
        let nodes = self.nodes().list_nodes().await?;
        let client = self.client.clone();
        let results = fan_out(nodes, self.worker_count, move |node: Node| {
            let client = client.clone();
            async move { client.daemon_status(&node.name).await }
        })
        .await;

        let mut statuses: Vec<NodeStatus> = results
            .into_iter()
            .filter_map(|outcome| match outcome.result {
                Ok(status) => Some(NodeStatus {
                    name: outcome.item.name,
                    url: outcome.item.url,
                    node_name: status.node_name,
                    pending: status.pending,
                    running: status.running,
                    finished: status.finished,
                }),
                Err(e) => {
                    warn!("节点 {} 状态查询失败，已从面板中省略: {}", outcome.item.name, e);
                    None
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(statuses)
    }

    pub async fn list_nodes(&self) -> FleetResult<Vec<Node>> {
        self.nodes().list_nodes().await
    }

    #[instrument(skip(self, request), fields(node = %request.name))]
    pub async fn add_node(&self, request: NewNode) -> FleetResult<Node> {
        let name = request.name.trim();
        validation::node_name(name)?;
        not_blank("url", &request.url)?;
        let url = Url::parse(request.url.trim())
            .map_err(|e| FleetError::validation(format!("节点地址无效: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FleetError::validation("节点地址必须是 http 或 https"));
        }

        let (username, password) = self.seal_credentials(request.username, request.password)?;
        let node = self
            .nodes()
            .add_node(name, url.as_str(), username.as_deref(), password)
            .await?;
        info!("节点已添加: {}", node.name);
        Ok(node)
    }

    /// 轮换节点凭证，密文原地替换
    pub async fn update_credentials(
        &self,
        name: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> FleetResult<()> {
        let (username, password) = self.seal_credentials(username, password)?;
        self.nodes()
            .update_credentials(name, username.as_deref(), password)
            .await
    }

    pub async fn delete_node(&self, name: &str) -> FleetResult<()> {
        self.nodes().delete_node(name).await
    }

    pub async fn list_projects(&self, node: &str) -> FleetResult<Vec<String>> {
        Ok(self.client.list_projects(node).await?.projects)
    }

    pub async fn list_spiders(&self, node: &str, project: &str) -> FleetResult<Vec<String>> {
        Ok(self.client.list_spiders(node, project).await?.spiders)
    }

    pub async fn list_versions(&self, node: &str, project: &str) -> FleetResult<Vec<String>> {
        Ok(self.client.list_versions(node, project).await?.versions)
    }

    /// 节点作业列表，第一页会先触发一次对账，对账失败不影响列表
    pub async fn node_jobs(&self, node: &str, filter: &JobFilter) -> FleetResult<JobPage> {
        self.nodes().get_node(node).await?;
        if filter.page <= 1 {
            if let Err(e) = self.reconciler.reconcile(node).await {
                warn!("节点 {} 对账失败，返回已存储的作业: {}", node, e);
            }
        }
        self.jobs.list_jobs(node, filter).await
    }

    /// 显式刷新节点作业状态
    pub async fn refresh_jobs(&self, node: &str) -> FleetResult<ReconcileReport> {
        self.nodes().get_node(node).await?;
        self.reconciler.reconcile(node).await
    }

    /// 作业详情，已软删除的作业视为不存在
    pub async fn get_job(&self, id: i64) -> FleetResult<Job> {
        let job = self.load_job(id).await?;
        if job.deleted {
            return Err(FleetError::JobNotFound { id });
        }
        Ok(job)
    }

    #[instrument(skip(self))]
    pub async fn stop_job(&self, id: i64, actor: Option<&str>) -> FleetResult<Job> {
        let job = self.load_job(id).await?;
        let response = self.client.cancel(&job.node, &job.project, &job.job_id).await?;
        info!(
            "作业 {} 已在节点 {} 上取消 (之前状态: {:?})",
            job.job_id, job.node, response.prevstate
        );
        self.jobs.mark_stopped(id, actor).await?;
        self.load_job(id).await
    }

    pub async fn delete_job(&self, id: i64) -> FleetResult<()> {
        self.jobs.soft_delete(id).await
    }

    /// 反向代理到节点
    pub async fn proxy(
        &self,
        node: &str,
        method: Method,
        path: &str,
        query: Option<&str>,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> FleetResult<ProxyResponse> {
        self.client
            .forward(node, method, path, query, content_type, body)
            .await
    }

    async fn load_job(&self, id: i64) -> FleetResult<Job> {
        self.jobs
            .get_job(id)
            .await?
            .ok_or(FleetError::JobNotFound { id })
    }

    fn seal_credentials(
        &self,
        username: Option<String>,
        password: Option<String>,
    ) -> FleetResult<(Option<String>, Option<Vec<u8>>)> {
        let username = username
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        let password = match (&username, password.filter(|p| !p.is_empty())) {
            (Some(_), Some(password)) => Some(self.vault.encrypt(&password, &self.secret)?),
            (None, Some(_)) => return Err(FleetError::validation("设置密码时必须提供用户名")),
            (_, None) => None,
        };
        Ok((username, password))
    }
}
