//! 集群调度系统的基础设施实现
//!
//! - [`database`]: SQLite 作业存储、任务仓储和节点目录
//! - [`node_client`]: 远程节点协议客户端
//! - [`security`]: AES-GCM 凭证库
//! - [`builder`]: Python egg 构建
//! - [`observability`]: 业务指标

pub mod builder;
pub mod database;
pub mod node_client;
pub mod observability;
pub mod security;

pub use builder::PythonEggBuilder;
pub use database::{DatabaseManager, SqliteJobStore, SqliteNodeDirectory, SqliteTaskRepository};
pub use node_client::{NodeClient, ProxyResponse};
pub use observability::FleetMetrics;
pub use security::AesGcmVault;
