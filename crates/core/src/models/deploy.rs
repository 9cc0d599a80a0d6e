use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 部署会话
///
/// 只存在于“配置”与“执行”两个请求之间，通过签名令牌传递，不落库。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploySession {
    pub project: String,
    pub source_path: PathBuf,
    pub version: String,
    pub nodes: Vec<String>,
}

/// 部署配置请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub project: String,
    pub source_path: String,
    pub nodes: Vec<String>,
}

/// 配置阶段的产物：签名令牌与解析后的会话
#[derive(Debug, Clone, Serialize)]
pub struct DeployTicket {
    pub token: String,
    pub session: DeploySession,
}
