use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 远程爬虫节点
///
/// `name` 在创建后不可变，作业和任务通过它引用节点；
/// `password` 保存的是凭证库加密后的密文。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
    }
}

/// 注册节点的输入，密码为明文，由调用方在落库前加密
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNode {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// 节点守护进程状态（daemonstatus.json）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub name: String,
    pub url: String,
    pub node_name: String,
    pub pending: i64,
    pub running: i64,
    pub finished: i64,
}
