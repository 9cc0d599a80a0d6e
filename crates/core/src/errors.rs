use thiserror::Error;
use uuid::Uuid;

/// 集群调度错误类型定义
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: Uuid },

    #[error("节点未找到: {name}")]
    NodeNotFound { name: String },

    #[error("作业未找到: {id}")]
    JobNotFound { id: i64 },

    #[error("调度引擎中不存在该作业: {id}")]
    EngineJobNotFound { id: Uuid },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("节点 {node} 网络错误: {message}")]
    Network { node: String, message: String },

    #[error("节点 {node} 返回非ok状态 '{status}': {message}")]
    RemoteStatus {
        node: String,
        status: String,
        message: String,
    },

    #[error("节点 {node} 响应解析失败: {message}")]
    Decode { node: String, message: String },

    #[error("凭证处理失败: {0}")]
    Credential(String),

    #[error("构建失败: {0}")]
    Build(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("部署令牌无效: {0}")]
    InvalidToken(String),

    #[error("工作协程崩溃: {0}")]
    WorkerPanic(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl FleetError {
    /// 用户可修正的输入错误
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FleetError::Validation(_) | FleetError::InvalidCron { .. }
        )
    }

    /// 远程节点协议错误（不可达、非ok状态、响应格式错误）
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            FleetError::Network { .. } | FleetError::RemoteStatus { .. } | FleetError::Decode { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FleetError::TaskNotFound { .. }
                | FleetError::NodeNotFound { .. }
                | FleetError::JobNotFound { .. }
                | FleetError::EngineJobNotFound { .. }
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        FleetError::Validation(message.into())
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type FleetResult<T> = std::result::Result<T, FleetError>;
