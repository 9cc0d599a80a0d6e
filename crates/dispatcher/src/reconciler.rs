//! 作业状态对账
//!
//! 从节点拉取两份文档：
//!
//! - `logs/stats.json`：logparser 的统计数据，按 (project, spider, job id) 索引
//! - `listjobs.json`：pending / running / finished 实时列表
//!
//! 实时列表中的每个作业都会写入作业存储。命中统计数据时写入完整记录，否则只写入
//! 列表中可得的字段。存储端只接受更新时间更新的写入，因此重复对账是幂等的。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use fleet_core::{
    logging::StructuredLogger,
    models::{JobKey, JobStatus, JobUpsert, UpsertOutcome},
    traits::JobStore,
    FleetResult,
};
use fleet_infrastructure::{
    node_client::{RemoteJob, SpiderLogStat},
    FleetMetrics, NodeClient,
};

use crate::cron_utils::CronSchedule;
use crate::fan_out::{fan_out, FanOutResult};

/// 单个节点一次对账的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub node: String,
    /// 实时列表中的作业数
    pub seen: usize,
    /// 命中统计数据的作业数
    pub enriched: usize,
    /// 只用实时列表字段写入的作业数
    pub degraded: usize,
    pub written: usize,
    /// 时间戳不比已存储值新而被忽略的写入
    pub ignored: usize,
    /// 缺少 project 而跳过的条目
    pub skipped: usize,
}

#[derive(Clone)]
pub struct JobReconciler {
    client: NodeClient,
    jobs: Arc<dyn JobStore>,
    worker_count: usize,
}

impl JobReconciler {
    pub fn new(client: NodeClient, jobs: Arc<dyn JobStore>, worker_count: usize) -> Self {
        Self {
            client,
            jobs,
            worker_count,
        }
    }

    /// 对账单个节点，实时列表拉取失败或存储失败时返回错误
    #[instrument(skip(self))]
    pub async fn reconcile(&self, node: &str) -> FleetResult<ReconcileReport> {
        let stats = match self.client.log_stats(node).await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("节点 {} 的统计数据不可用，本次只写入实时状态: {}", node, e);
                None
            }
        };
        let listing = self.client.list_jobs(node).await?;

        let mut report = ReconcileReport {
            node: node.to_string(),
            ..Default::default()
        };

        for (status, remote) in listing.entries() {
            report.seen += 1;
            let Some(project) = remote.project.as_deref().filter(|p| !p.is_empty()) else {
                warn!("节点 {} 上的作业 {} 缺少项目名，跳过", node, remote.id);
                report.skipped += 1;
                continue;
            };

            let stat = match &stats {
                Some(stats) => match stats.lookup(project, &remote.spider, &remote.id) {
                    Ok(stat) => Some(stat),
                    Err(miss) => {
                        StructuredLogger::log_stats_miss(
                            node,
                            project,
                            &remote.spider,
                            &remote.id,
                            &miss.to_string(),
                        );
                        None
                    }
                },
                None => None,
            };
            if stat.is_some() {
                report.enriched += 1;
            } else {
                report.degraded += 1;
            }

            let upsert = build_upsert(node, project, status, remote, stat);
            match self.jobs.upsert_job(&upsert).await? {
                UpsertOutcome::Written => report.written += 1,
                UpsertOutcome::Ignored => {
                    report.ignored += 1;
                    StructuredLogger::log_upsert_ignored(project, &remote.id, node);
                }
            }
        }

        FleetMetrics::record_reconcile_upsert("written", report.written as u64);
        FleetMetrics::record_reconcile_upsert("ignored", report.ignored as u64);
        debug!(
            "节点 {} 对账完成: 共 {} 个作业, 写入 {}, 忽略 {}",
            node, report.seen, report.written, report.ignored
        );
        Ok(report)
    }

    /// 并发对账所有节点，失败只记录日志
    pub async fn reconcile_all(&self) -> Vec<FanOutResult<String, ReconcileReport>> {
        let nodes = match self.client.directory().list_nodes().await {
            Ok(nodes) => nodes.into_iter().map(|n| n.name).collect::<Vec<_>>(),
            Err(e) => {
                error!("读取节点列表失败，跳过本轮对账: {}", e);
                return Vec::new();
            }
        };

        let this = self.clone();
        let results = fan_out(nodes, self.worker_count, move |node: String| {
            let this = this.clone();
            async move { this.reconcile(&node).await }
        })
        .await;

        for result in &results {
            if let Err(e) = &result.result {
                warn!("节点 {} 对账失败: {}", result.item, e);
            }
        }
        results
    }

    /// 按 cron 周期对账整个集群，收到关闭信号后退出
    pub async fn run_reconcile_loop(
        self: Arc<Self>,
        schedule: CronSchedule,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("周期对账已启动: {}", schedule.expression());
        loop {
            let Some(wait) = schedule.time_until_next(chrono::Utc::now()) else {
                warn!("对账CRON表达式没有后续执行时间，周期对账退出");
                break;
            };

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("周期对账收到关闭信号");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let results = self.reconcile_all().await;
            let succeeded = results.iter().filter(|r| r.is_ok()).count();
            info!("周期对账完成: {}/{} 个节点成功", succeeded, results.len());
        }
    }
}

/// 由实时列表条目与可选的统计数据构造写入请求
pub fn build_upsert(
    node: &str,
    project: &str,
    status: JobStatus,
    remote: &RemoteJob,
    stat: Option<&SpiderLogStat>,
) -> JobUpsert {
    let key = JobKey::new(project, &remote.id, node);
    let mut upsert = JobUpsert::new(key, &remote.spider, status);

    upsert.create_time = remote.start_time;
    upsert.start_time = remote.start_time;
    upsert.finish_time = remote.end_time;
    upsert.metrics.pid = remote.pid;
    upsert.href_log = remote.log_url.as_deref().map(|url| rewrite_link(node, url));
    upsert.href_items = remote.items_url.as_deref().map(|url| rewrite_link(node, url));

    let listing_time = remote.end_time.or(remote.start_time);
    match stat {
        Some(stat) => {
            upsert.update_time = stat.last_update_time.or(listing_time);
            upsert.metrics.pages = stat.pages;
            upsert.metrics.items = stat.items;
            upsert.metrics.runtime = stat.runtime.clone();
            if upsert.href_log.is_none() {
                upsert.href_log = stat
                    .log_path
                    .as_deref()
                    .and_then(|path| path.find("/logs/").map(|idx| &path[idx..]))
                    .map(|path| rewrite_link(node, path));
            }
        }
        None => upsert.update_time = listing_time,
    }
    upsert
}

/// 节点相对链接改写为经过本系统反向代理的路径
pub fn rewrite_link(node: &str, url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        },
        Err(_) if url.starts_with('/') => url.to_string(),
        Err(_) => format!("/{url}"),
    };
    format!("/{node}/scrapyd-backend{path}")
}
