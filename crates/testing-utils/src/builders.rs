//! 测试数据构建器

use fleet_core::models::{SpiderArgs, TaskDraft, TaskSchedule};

/// 任务草稿构建器，默认每分钟触发一次
pub struct TaskDraftBuilder {
    draft: TaskDraft,
}

impl TaskDraftBuilder {
    pub fn new(node: &str) -> Self {
        Self {
            draft: TaskDraft {
                id: None,
                name: "test_task".to_string(),
                project: "bookstore".to_string(),
                spider: "books".to_string(),
                node: node.to_string(),
                schedule: TaskSchedule::Cron("* * * * *".to_string()),
                args: SpiderArgs::new(),
                actor: Some("tester".to_string()),
            },
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.draft.name = name.to_string();
        self
    }

    pub fn with_project(mut self, project: &str) -> Self {
        self.draft.project = project.to_string();
        self
    }

    pub fn with_spider(mut self, spider: &str) -> Self {
        self.draft.spider = spider.to_string();
        self
    }

    pub fn with_cron(mut self, cron: &str) -> Self {
        self.draft.schedule = TaskSchedule::Cron(cron.to_string());
        self
    }

    pub fn one_shot(mut self) -> Self {
        self.draft.schedule = TaskSchedule::OneShot;
        self
    }

    pub fn with_arg(mut self, key: &str, value: &str) -> Self {
        self.draft.args.push(key, value);
        self
    }

    pub fn with_actor(mut self, actor: Option<&str>) -> Self {
        self.draft.actor = actor.map(str::to_string);
        self
    }

    pub fn build(self) -> TaskDraft {
        self.draft
    }
}
