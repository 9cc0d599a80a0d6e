//! 数据仓储层接口定义
//!
//! 此模块定义了集群调度系统持久化层的抽象接口：
//! - 作业存储接口 (JobStore)
//! - 任务仓储接口 (TaskRepository)
//! - 节点目录接口 (NodeDirectory)
//!
//! ## 设计原则
//!
//! 每个接口只负责一种实体，全部为异步方法，返回 `FleetResult<T>`，
//! 并要求实现 `Send + Sync`，可以在调度引擎回调和 HTTP 处理器之间共享。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use fleet_core::models::{JobKey, JobStatus, JobUpsert};
//! use fleet_core::traits::JobStore;
//!
//! async fn record(store: &dyn JobStore) -> FleetResult<()> {
//!     let key = JobKey::new("bookstore", "task_books_node-a_2024-01-01T00_00_00", "node-a");
//!     let upsert = JobUpsert::scheduled(key, "books", None, None, Utc::now());
//!     match store.upsert_job(&upsert).await? {
//!         UpsertOutcome::Written => println!("已写入"),
//!         UpsertOutcome::Ignored => println!("时间戳较旧，已忽略"),
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::FleetResult;
use crate::models::{Job, JobFilter, JobKey, JobPage, JobUpsert, Node, Task, UpsertOutcome};

/// 作业存储接口
///
/// 作业只能通过“更新时间更新者胜出”的 upsert 修改，
/// 错误标记、停止标记和软删除是按键直接更新的例外。
///
/// # 写入规则
///
/// 1. 自然键不存在时插入新行
/// 2. 已存在时，仅当传入的 `update_time` 严格大于已存储的值
///    （或已存储的值为空而传入值不为空）才覆盖
/// 3. 覆盖时可空列与旧值合并，空值不会擦除已有数据
/// 4. 其余情况返回 [`UpsertOutcome::Ignored`]，不视为错误
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 按自然键写入作业
    async fn upsert_job(&self, upsert: &JobUpsert) -> FleetResult<UpsertOutcome>;

    /// 记录调度失败信息并将状态置为 error
    ///
    /// 返回 `false` 表示对应的作业行不存在。
    async fn set_job_error(&self, key: &JobKey, payload: &str) -> FleetResult<bool>;

    /// 分页列出某个节点上未被软删除的作业
    async fn list_jobs(&self, node: &str, filter: &JobFilter) -> FleetResult<JobPage>;

    async fn get_job(&self, id: i64) -> FleetResult<Option<Job>>;

    /// 软删除，作业行永远不会被物理删除
    async fn soft_delete(&self, id: i64) -> FleetResult<()>;

    /// 记录停止作业的操作者
    async fn mark_stopped(&self, id: i64, actor: Option<&str>) -> FleetResult<()>;
}

/// 任务仓储接口
///
/// 只持久化周期任务，一次性任务不会进入仓储。
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> FleetResult<Task>;

    async fn get(&self, id: Uuid) -> FleetResult<Option<Task>>;

    /// `search` 按名称、项目、爬虫或节点模糊匹配，`None` 返回全部
    async fn list(&self, search: Option<&str>) -> FleetResult<Vec<Task>>;

    /// 获取所有未暂停的任务，用于启动时重新注册
    async fn list_active(&self) -> FleetResult<Vec<Task>>;

    async fn update(&self, task: &Task) -> FleetResult<()>;

    async fn set_paused(&self, id: Uuid, paused: bool) -> FleetResult<()>;

    /// 返回 `false` 表示任务不存在
    async fn delete(&self, id: Uuid) -> FleetResult<bool>;
}

/// 节点目录接口
///
/// 节点名称创建后不可变，密码字段只保存加密后的密文。
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// 按名称查找节点，不存在时返回 `NodeNotFound`
    async fn get_node(&self, name: &str) -> FleetResult<Node>;

    /// 按名称排序列出所有节点
    async fn list_nodes(&self) -> FleetResult<Vec<Node>>;

    async fn add_node(
        &self,
        name: &str,
        url: &str,
        username: Option<&str>,
        encrypted_password: Option<Vec<u8>>,
    ) -> FleetResult<Node>;

    /// 原地替换凭证
    async fn update_credentials(
        &self,
        name: &str,
        username: Option<&str>,
        encrypted_password: Option<Vec<u8>>,
    ) -> FleetResult<()>;

    async fn delete_node(&self, name: &str) -> FleetResult<()>;
}
