use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::FleetError;

/// 作业状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// 本地已触发，尚未被节点确认
    Scheduled,
    Pending,
    Running,
    Finished,
    /// 调度请求失败
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "finished" => Ok(JobStatus::Finished),
            "error" => Ok(JobStatus::Error),
            other => Err(FleetError::validation(format!("未知的作业状态: {other}"))),
        }
    }
}

/// 作业自然键 (project, job_id, node)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub project: String,
    pub job_id: String,
    pub node: String,
}

impl JobKey {
    pub fn new(
        project: impl Into<String>,
        job_id: impl Into<String>,
        node: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            job_id: job_id.into(),
            node: node.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.project, self.job_id, self.node)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub pages: Option<i64>,
    pub items: Option<i64>,
    pub pid: Option<i64>,
    pub runtime: Option<String>,
}

/// 作业写入请求
///
/// 只有当 `update_time` 比已存储的值更新时才会覆盖已有记录，
/// 可空列与已有值合并，不会被空值擦除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpsert {
    pub key: JobKey,
    pub spider: String,
    pub status: JobStatus,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub metrics: JobMetrics,
    pub href_log: Option<String>,
    pub href_items: Option<String>,
    pub error: Option<String>,
    pub task_id: Option<Uuid>,
    pub started_by: Option<String>,
}

impl JobUpsert {
    pub fn new(key: JobKey, spider: impl Into<String>, status: JobStatus) -> Self {
        Self {
            key,
            spider: spider.into(),
            status,
            create_time: None,
            update_time: None,
            start_time: None,
            finish_time: None,
            metrics: JobMetrics::default(),
            href_log: None,
            href_items: None,
            error: None,
            task_id: None,
            started_by: None,
        }
    }

    /// 任务触发时写入的 scheduled 记录
    ///
    /// 不携带 `update_time`，节点上报的第一份带时间戳的状态总能覆盖它。
    pub fn scheduled(
        key: JobKey,
        spider: impl Into<String>,
        task_id: Option<Uuid>,
        started_by: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        let mut upsert = Self::new(key, spider, JobStatus::Scheduled);
        upsert.create_time = Some(at);
        upsert.task_id = task_id;
        upsert.started_by = started_by;
        upsert
    }
}

/// 写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    /// 新建或覆盖
    Written,
    /// 时间戳不比已存储的值新，被忽略
    Ignored,
}

/// 已存储的作业记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub project: String,
    pub spider: String,
    pub job_id: String,
    pub node: String,
    pub status: JobStatus,
    pub deleted: bool,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub pages: Option<i64>,
    pub items: Option<i64>,
    pub pid: Option<i64>,
    pub runtime: Option<String>,
    pub href_log: Option<String>,
    pub href_items: Option<String>,
    pub error: Option<String>,
    pub task_id: Option<Uuid>,
    pub started_by: Option<String>,
    pub stopped_by: Option<String>,
}

impl Job {
    pub fn key(&self) -> JobKey {
        JobKey::new(&self.project, &self.job_id, &self.node)
    }

    /// 解码 base64 存储的错误信息
    pub fn decoded_error(&self) -> Option<String> {
        self.error
            .as_deref()
            .and_then(|raw| STANDARD.decode(raw).ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// 错误信息以 base64 形式落库
pub fn encode_error_payload(message: &str) -> String {
    STANDARD.encode(message.as_bytes())
}

/// 作业列表过滤条件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    /// 按项目、爬虫或作业ID模糊匹配
    pub search: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            search: None,
            page: 1,
            page_size: 50,
        }
    }
}

impl JobFilter {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * i64::from(self.page_size)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub items: Vec<Job>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_through_str() {
        for status in [
            JobStatus::Scheduled,
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Finished,
            JobStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_error_payload_is_base64() {
        let encoded = encode_error_payload("节点返回 status=error");
        assert!(!encoded.contains(' '));

        let job = Job {
            id: 1,
            project: "p".to_string(),
            spider: "s".to_string(),
            job_id: "j".to_string(),
            node: "n".to_string(),
            status: JobStatus::Error,
            deleted: false,
            create_time: None,
            update_time: None,
            start_time: None,
            finish_time: None,
            pages: None,
            items: None,
            pid: None,
            runtime: None,
            href_log: None,
            href_items: None,
            error: Some(encoded),
            task_id: None,
            started_by: None,
            stopped_by: None,
        };
        assert_eq!(job.decoded_error().as_deref(), Some("节点返回 status=error"));
    }

    #[test]
    fn test_filter_offset() {
        let filter = JobFilter {
            page: 3,
            page_size: 20,
            ..JobFilter::default()
        };
        assert_eq!(filter.offset(), 40);
        let first = JobFilter {
            page: 0,
            ..JobFilter::default()
        };
        assert_eq!(first.offset(), 0);
    }
}
