use serde::Serialize;
use serde_json::{json, Value};

/// 部署进度事件
///
/// 以 `event: <name>\ndata: <单行JSON>\n\n` 的形式推送。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployEvent {
    pub name: String,
    pub data: String,
}

impl DeployEvent {
    pub const LOCKED: &'static str = "locked_for_deploy";
    pub const BUILD_ERROR: &'static str = "build_error";
    pub const COMPLETE: &'static str = "deployment-complete";
    pub const NODE_PREFIX: &'static str = "status_";

    fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data: data.to_string(),
        }
    }

    /// 已有部署在进行，当前请求排队等待
    pub fn locked() -> Self {
        Self::new(
            Self::LOCKED,
            json!({ "message": "当前有部署正在进行，已排队等待" }),
        )
    }

    pub fn build_error(message: &str) -> Self {
        Self::new(Self::BUILD_ERROR, json!({ "error": message }))
    }

    pub fn node_success(node: &str, spiders: i64) -> Self {
        Self::new(
            format!("{}{node}", Self::NODE_PREFIX),
            json!({ "node": node, "success": true, "spiders": spiders }),
        )
    }

    pub fn node_failure(node: &str, error: &str) -> Self {
        Self::new(
            format!("{}{node}", Self::NODE_PREFIX),
            json!({ "node": node, "success": false, "error": error }),
        )
    }

    pub fn complete(project: &str, version: &str, succeeded: usize, failed: usize) -> Self {
        Self::new(
            Self::COMPLETE,
            json!({
                "project": project,
                "version": version,
                "succeeded": succeeded,
                "failed": failed,
            }),
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.name == Self::COMPLETE || self.name == Self::BUILD_ERROR
    }

    /// 节点结果事件对应的节点名
    pub fn node(&self) -> Option<&str> {
        self.name.strip_prefix(Self::NODE_PREFIX)
    }

    pub fn to_sse_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name, self.data)
    }
}
