use async_trait::async_trait;
use fleet_core::{
    models::{SpiderArgs, Task, TaskSchedule},
    traits::TaskRepository,
    FleetError, FleetResult,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::like_pattern;

const TASK_COLUMNS: &str =
    "id, name, project, spider, node, cron, args, paused, created_by, modified_by, created_at, updated_at";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> FleetResult<Task> {
        let id: String = row.try_get("id")?;
        let args: String = row.try_get("args")?;

        Ok(Task {
            id: Uuid::parse_str(&id)
                .map_err(|e| FleetError::Internal(format!("任务ID格式错误 {id}: {e}")))?,
            name: row.try_get("name")?,
            project: row.try_get("project")?,
            spider: row.try_get("spider")?,
            node: row.try_get("node")?,
            schedule: TaskSchedule::Cron(row.try_get("cron")?),
            args: SpiderArgs::parse_query(&args),
            paused: row.try_get("paused")?,
            created_by: row.try_get("created_by")?,
            modified_by: row.try_get("modified_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn cron_of(task: &Task) -> FleetResult<&str> {
        task.schedule
            .cron_expression()
            .ok_or_else(|| FleetError::validation("一次性任务不能持久化"))
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(task.id = %task.id, task.name = %task.name))]
    async fn create(&self, task: &Task) -> FleetResult<Task> {
        let cron = Self::cron_of(task)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (id, name, project, spider, node, cron, args, paused,
                               created_by, modified_by, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.name)
        .bind(&task.project)
        .bind(&task.spider)
        .bind(&task.node)
        .bind(cron)
        .bind(task.args.to_query_string())
        .bind(task.paused)
        .bind(&task.created_by)
        .bind(&task.modified_by)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("任务已保存: {}", task.id);
        Ok(task.clone())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> FleetResult<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self, search: Option<&str>) -> FleetResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE ?1 IS NULL OR name LIKE ?1 ESCAPE '\\' OR project LIKE ?1 ESCAPE '\\' \
             OR spider LIKE ?1 ESCAPE '\\' OR node LIKE ?1 ESCAPE '\\' \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(like_pattern(search))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self))]
    async fn list_active(&self) -> FleetResult<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE paused = 0 ORDER BY created_at");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self, task), fields(task.id = %task.id))]
    async fn update(&self, task: &Task) -> FleetResult<()> {
        let cron = Self::cron_of(task)?;

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET name = ?1, project = ?2, spider = ?3, node = ?4, cron = ?5, args = ?6,
                paused = ?7, modified_by = ?8, updated_at = ?9
            WHERE id = ?10
            "#,
        )
        .bind(&task.name)
        .bind(&task.project)
        .bind(&task.spider)
        .bind(&task.node)
        .bind(cron)
        .bind(task.args.to_query_string())
        .bind(task.paused)
        .bind(&task.modified_by)
        .bind(task.updated_at)
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FleetError::TaskNotFound { id: task.id });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_paused(&self, id: Uuid, paused: bool) -> FleetResult<()> {
        let result = sqlx::query("UPDATE tasks SET paused = ?1 WHERE id = ?2")
            .bind(paused)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(FleetError::TaskNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> FleetResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;

    fn task(cron: &str) -> Task {
        let args = SpiderArgs::from_pairs([("category", "books"), ("category", "music")]);
        Task::new(
            "nightly",
            "bookstore",
            "books",
            "node-a",
            TaskSchedule::Cron(cron.to_string()),
            args,
            Some("admin".to_string()),
        )
    }

    #[tokio::test]
    async fn test_task_crud() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = db.task_repository();

        let created = repo.create(&task("0 2 * * *")).await.unwrap();
        let loaded = repo.get(created.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "nightly");
        assert_eq!(loaded.args.get_all("category").count(), 2);
        assert_eq!(loaded.schedule, TaskSchedule::Cron("0 2 * * *".to_string()));

        let mut edited = loaded.clone();
        edited.schedule = TaskSchedule::Cron("*/5 * * * *".to_string());
        edited.modified_by = Some("ops".to_string());
        repo.update(&edited).await.unwrap();
        let reloaded = repo.get(created.id).await.unwrap().unwrap();
        assert_eq!(reloaded.schedule.cron_expression(), Some("*/5 * * * *"));
        assert_eq!(reloaded.modified_by.as_deref(), Some("ops"));

        assert!(repo.delete(created.id).await.unwrap());
        assert!(!repo.delete(created.id).await.unwrap());
        assert!(repo.get(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_active_skips_paused() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = db.task_repository();

        let active = repo.create(&task("0 * * * *")).await.unwrap();
        let paused = repo.create(&task("30 * * * *")).await.unwrap();
        repo.set_paused(paused.id, true).await.unwrap();

        let ids: Vec<_> = repo.list_active().await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![active.id]);
        assert_eq!(repo.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_with_search() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = db.task_repository();

        let nightly = repo.create(&task("0 2 * * *")).await.unwrap();
        let mut other = task("0 3 * * *");
        other.name = "hourly-news".to_string();
        other.project = "news".to_string();
        other.spider = "headlines".to_string();
        other.node = "node-b".to_string();
        let other = repo.create(&other).await.unwrap();

        let found = |tasks: Vec<Task>| tasks.into_iter().map(|t| t.id).collect::<Vec<_>>();
        assert_eq!(found(repo.list(Some("NIGHT")).await.unwrap()), vec![nightly.id]);
        assert_eq!(found(repo.list(Some("headline")).await.unwrap()), vec![other.id]);
        assert_eq!(found(repo.list(Some("node-b")).await.unwrap()), vec![other.id]);
        assert_eq!(found(repo.list(Some("bookstore")).await.unwrap()), vec![nightly.id]);
        assert!(repo.list(Some("missing")).await.unwrap().is_empty());
        assert_eq!(repo.list(Some(" ")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_one_shot_is_rejected() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = db.task_repository();
        let mut once = task("0 * * * *");
        once.schedule = TaskSchedule::OneShot;

        assert!(repo.create(&once).await.unwrap_err().is_validation());
        assert!(matches!(
            repo.set_paused(Uuid::new_v4(), true).await,
            Err(FleetError::TaskNotFound { .. })
        ));
    }
}
