//! # 数据模型
//!
//! 爬虫集群调度系统的核心数据结构。
//!
//! - [`Task`]: 可调度的爬虫任务（周期或一次性）
//! - [`Job`]: 节点上一次具体的爬虫运行，自然键为 (project, job_id, node)
//! - [`Node`]: 远程爬虫节点
//! - [`DeploySession`]: 一次部署在配置与执行之间的临时会话
//!
//! 所有时间字段统一使用 `DateTime<Utc>`。

pub mod deploy;
pub mod job;
pub mod node;
pub mod task;

pub use deploy::*;
pub use job::*;
pub use node::*;
pub use task::*;
