//! 集群调度核心
//!
//! - [`engine`]: 进程内 cron 调度引擎
//! - [`fan_out`]: 有界并发扇出池
//! - [`task_service`] / [`task_runner`]: 任务生命周期与触发回调
//! - [`reconciler`]: 节点作业状态对账
//! - [`deploy`]: 单飞部署编排与进度事件
//! - [`cluster`]: 节点面板、节点管理与作业操作

pub mod cluster;
pub mod cron_utils;
pub mod deploy;
pub mod engine;
pub mod fan_out;
pub mod reconciler;
pub mod task_runner;
pub mod task_service;

pub use cluster::ClusterService;
pub use cron_utils::CronSchedule;
pub use deploy::{DeployEvent, DeployOrchestrator, DeploySummary, DeployTokenService};
pub use engine::CronEngine;
pub use fan_out::{fan_out, FanOut, FanOutResult};
pub use reconciler::{JobReconciler, ReconcileReport};
pub use task_runner::TaskRuntime;
pub use task_service::{BulkOutcome, TaskService};
