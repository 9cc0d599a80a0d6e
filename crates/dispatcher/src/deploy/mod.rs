//! 部署编排
//!
//! 两阶段流程：`configure` 校验参数并签发令牌，独立的执行请求凭令牌重放同一组参数。
//! 执行阶段在集群级单飞锁内完成构建与扇出上传，进度以事件流推送给客户端。

pub mod events;
pub mod orchestrator;
pub mod token;

pub use events::DeployEvent;
pub use orchestrator::{DeployOrchestrator, DeploySummary};
pub use token::DeployTokenService;
