//! 节点接口响应结构
//!
//! 每个端点对应一个结构体，必填字段直接声明，可缺省字段使用 `Option`。

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use fleet_core::models::JobStatus;
use serde::{Deserialize, Serialize};

/// 所有响应共有的状态字段，先于具体结构解析
#[derive(Debug, Deserialize)]
pub struct StatusEnvelope {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusEnvelope {
    pub fn is_ok(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("ok")
    }
}

/// daemonstatus.json
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonStatus {
    pub node_name: String,
    pub status: String,
    pub pending: i64,
    pub running: i64,
    pub finished: i64,
}

/// listprojects.json
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectList {
    #[serde(default)]
    pub node_name: Option<String>,
    pub status: String,
    pub projects: Vec<String>,
}

/// listspiders.json
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpiderList {
    #[serde(default)]
    pub node_name: Option<String>,
    pub status: String,
    pub spiders: Vec<String>,
}

/// listversions.json
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VersionList {
    #[serde(default)]
    pub node_name: Option<String>,
    pub status: String,
    pub versions: Vec<String>,
}

/// schedule.json
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleResponse {
    #[serde(default)]
    pub node_name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub jobid: Option<String>,
}

/// cancel.json
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CancelResponse {
    #[serde(default)]
    pub node_name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub prevstate: Option<String>,
}

/// addversion.json
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddVersionResponse {
    #[serde(default)]
    pub node_name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub spiders: i64,
}

/// listjobs.json
#[derive(Debug, Clone, Deserialize)]
pub struct JobListing {
    #[serde(default)]
    pub node_name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub pending: Vec<RemoteJob>,
    #[serde(default)]
    pub running: Vec<RemoteJob>,
    #[serde(default)]
    pub finished: Vec<RemoteJob>,
}

impl JobListing {
    /// 按所在列表给出作业状态
    pub fn entries(&self) -> impl Iterator<Item = (JobStatus, &RemoteJob)> {
        self.pending
            .iter()
            .map(|job| (JobStatus::Pending, job))
            .chain(self.running.iter().map(|job| (JobStatus::Running, job)))
            .chain(self.finished.iter().map(|job| (JobStatus::Finished, job)))
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.running.len() + self.finished.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteJob {
    pub id: String,
    #[serde(default)]
    pub project: Option<String>,
    pub spider: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "node_time::deserialize")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "node_time::deserialize")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default)]
    pub log_url: Option<String>,
    #[serde(default)]
    pub items_url: Option<String>,
}

/// logs/stats.json（logparser 生成）
#[derive(Debug, Clone, Deserialize)]
pub struct LogStats {
    pub status: String,
    #[serde(default, deserialize_with = "node_time::deserialize")]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_update_timestamp: Option<DateTime<Utc>>,
    /// project -> spider -> job id
    #[serde(default)]
    pub datas: HashMap<String, HashMap<String, HashMap<String, SpiderLogStat>>>,
}

impl LogStats {
    /// 按 (project, spider, job id) 查找单个作业的统计
    pub fn lookup(&self, project: &str, spider: &str, job_id: &str) -> Result<&SpiderLogStat, StatMiss> {
        let spiders = self.datas.get(project).ok_or(StatMiss::Project)?;
        let jobs = spiders.get(spider).ok_or(StatMiss::Spider)?;
        jobs.get(job_id).ok_or(StatMiss::Job)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpiderLogStat {
    #[serde(default)]
    pub log_path: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default, deserialize_with = "node_time::deserialize")]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pages: Option<i64>,
    #[serde(default)]
    pub items: Option<i64>,
    #[serde(default, deserialize_with = "node_time::deserialize")]
    pub first_log_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "node_time::deserialize")]
    pub latest_log_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub runtime: Option<String>,
}

/// 统计文档中缺失的层级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatMiss {
    Project,
    Spider,
    Job,
}

impl fmt::Display for StatMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StatMiss::Project => "project_missing",
            StatMiss::Spider => "spider_missing",
            StatMiss::Job => "job_missing",
        };
        f.write_str(reason)
    }
}

/// 节点时间格式 "YYYY-MM-DD HH:MM:SS[.ffffff]"，按UTC解释，"N/A" 与空串表示缺失
pub mod node_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "N/A" {
            return Ok(None);
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").map(|dt| Some(dt.and_utc()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(raw) => parse(&raw).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
