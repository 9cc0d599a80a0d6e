use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 爬虫任务定义
///
/// 表示一个可调度的爬虫执行单元，触发时会在目标节点上调度一次 spider 运行。
///
/// # 字段说明
///
/// - `id`: 任务的稳定标识，同时作为调度引擎中的注册句柄
/// - `name`: 任务的人类可读名称
/// - `project` / `spider`: 目标节点上的项目与爬虫
/// - `node`: 目标节点名称
/// - `schedule`: cron 表达式或一次性标记
/// - `args`: 传递给 schedule.json 的参数（可重复键）
/// - `paused`: 持久化的暂停标记，列表查询时根据调度引擎的实际状态修正
/// - `created_by` / `modified_by`: 创建者与最后修改者
///
/// # 使用示例
///
/// ```rust
/// use fleet_core::models::{SpiderArgs, Task, TaskSchedule};
///
/// let mut args = SpiderArgs::new();
/// args.push("category", "books");
///
/// let task = Task::new(
///     "每日图书抓取",
///     "bookstore",
///     "books",
///     "node-a",
///     TaskSchedule::Cron("0 2 * * *".to_string()),
///     args,
///     Some("admin".to_string()),
/// );
/// assert!(!task.is_one_shot());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub project: String,
    pub spider: String,
    pub node: String,
    pub schedule: TaskSchedule,
    pub args: SpiderArgs,
    pub paused: bool,
    pub created_by: Option<String>,
    pub modified_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 任务调度方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "expression", rename_all = "snake_case")]
pub enum TaskSchedule {
    /// 周期任务，按 cron 表达式重复触发
    Cron(String),
    /// 一次性任务，注册后立即触发一次并自行注销
    OneShot,
}

impl TaskSchedule {
    pub fn is_one_shot(&self) -> bool {
        matches!(self, TaskSchedule::OneShot)
    }

    pub fn cron_expression(&self) -> Option<&str> {
        match self {
            TaskSchedule::Cron(expr) => Some(expr.as_str()),
            TaskSchedule::OneShot => None,
        }
    }
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        project: impl Into<String>,
        spider: impl Into<String>,
        node: impl Into<String>,
        schedule: TaskSchedule,
        args: SpiderArgs,
        actor: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            project: project.into(),
            spider: spider.into(),
            node: node.into(),
            schedule,
            args,
            paused: false,
            created_by: actor.clone(),
            modified_by: actor,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_one_shot(&self) -> bool {
        self.schedule.is_one_shot()
    }

    /// 作业ID前缀，用于区分周期任务与一次性任务产生的作业
    pub fn job_prefix(&self) -> &'static str {
        if self.is_one_shot() {
            "one_time_job"
        } else {
            "task"
        }
    }

    /// 根据 spider、节点和触发时间生成确定性的作业ID
    pub fn make_job_id(&self, fired_at: DateTime<Utc>) -> String {
        format!(
            "{}_{}_{}_{}",
            self.job_prefix(),
            self.spider,
            self.node,
            fired_at.format("%Y-%m-%dT%H_%M_%S")
        )
    }
}

/// 创建任务时的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub project: String,
    pub spider: String,
    pub node: String,
    pub schedule: TaskSchedule,
    #[serde(default)]
    pub args: SpiderArgs,
    #[serde(default)]
    pub actor: Option<String>,
}

/// 编辑任务时的输入，未提供的字段保持不变
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskEdit {
    pub name: Option<String>,
    pub project: Option<String>,
    pub spider: Option<String>,
    pub node: Option<String>,
    pub cron: Option<String>,
    pub args: Option<SpiderArgs>,
    pub actor: Option<String>,
}

/// 批量任务操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Fire,
    Stop,
    Delete,
}

/// Spider 参数多值映射
///
/// 保持插入顺序并允许重复键，持久化为 URL 查询字符串。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpiderArgs(Vec<(String, String)>);

impl SpiderArgs {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// 替换某个键的全部取值
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.retain(|(k, _)| k != key);
        self.0.push((key.to_string(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.0.iter())
            .finish()
    }

    pub fn parse_query(query: &str) -> Self {
        Self(
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        )
    }
}
