use async_trait::async_trait;
use fleet_core::{
    models::{Job, JobFilter, JobKey, JobPage, JobStatus, JobUpsert, UpsertOutcome},
    traits::JobStore,
    FleetError, FleetResult,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::like_pattern;

const JOB_COLUMNS: &str = "id, project, spider, job_id, node, status, deleted, create_time, update_time, \
     start_time, finish_time, pages, items, pid, runtime, href_log, href_items, error, task_id, \
     started_by, stopped_by";

const JOB_FILTER: &str = "WHERE node = ?1 AND deleted = 0 AND (?2 IS NULL OR status = ?2) \
     AND (?3 IS NULL OR project LIKE ?3 ESCAPE '\\' OR spider LIKE ?3 ESCAPE '\\' \
     OR job_id LIKE ?3 ESCAPE '\\')";

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &SqliteRow) -> FleetResult<Job> {
        let status: String = row.try_get("status")?;
        let task_id: Option<String> = row.try_get("task_id")?;

        Ok(Job {
            id: row.try_get("id")?,
            project: row.try_get("project")?,
            spider: row.try_get("spider")?,
            job_id: row.try_get("job_id")?,
            node: row.try_get("node")?,
            status: status.parse()?,
            deleted: row.try_get("deleted")?,
            create_time: row.try_get("create_time")?,
            update_time: row.try_get("update_time")?,
            start_time: row.try_get("start_time")?,
            finish_time: row.try_get("finish_time")?,
            pages: row.try_get("pages")?,
            items: row.try_get("items")?,
            pid: row.try_get("pid")?,
            runtime: row.try_get("runtime")?,
            href_log: row.try_get("href_log")?,
            href_items: row.try_get("href_items")?,
            error: row.try_get("error")?,
            task_id: task_id.and_then(|raw| Uuid::parse_str(&raw).ok()),
            started_by: row.try_get("started_by")?,
            stopped_by: row.try_get("stopped_by")?,
        })
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    #[instrument(skip(self, upsert), fields(job = %upsert.key))]
    async fn upsert_job(&self, upsert: &JobUpsert) -> FleetResult<UpsertOutcome> {
        // 冲突时仅在更新时间严格更新的情况下覆盖，可空列与旧值合并
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                project, spider, job_id, node, status, create_time, update_time,
                start_time, finish_time, pages, items, pid, runtime,
                href_log, href_items, error, task_id, started_by
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT (project, job_id, node) DO UPDATE SET
                spider = excluded.spider,
                status = excluded.status,
                create_time = COALESCE(jobs.create_time, excluded.create_time),
                update_time = excluded.update_time,
                start_time = COALESCE(excluded.start_time, jobs.start_time),
                finish_time = COALESCE(excluded.finish_time, jobs.finish_time),
                pages = COALESCE(excluded.pages, jobs.pages),
                items = COALESCE(excluded.items, jobs.items),
                pid = COALESCE(excluded.pid, jobs.pid),
                runtime = COALESCE(excluded.runtime, jobs.runtime),
                href_log = COALESCE(excluded.href_log, jobs.href_log),
                href_items = COALESCE(excluded.href_items, jobs.href_items),
                error = COALESCE(excluded.error, jobs.error),
                task_id = COALESCE(jobs.task_id, excluded.task_id),
                started_by = COALESCE(jobs.started_by, excluded.started_by)
            WHERE excluded.update_time IS NOT NULL
              AND (jobs.update_time IS NULL
                   OR julianday(excluded.update_time) > julianday(jobs.update_time))
            "#,
        )
        .bind(&upsert.key.project)
        .bind(&upsert.spider)
        .bind(&upsert.key.job_id)
        .bind(&upsert.key.node)
        .bind(upsert.status.as_str())
        .bind(upsert.create_time)
        .bind(upsert.update_time)
        .bind(upsert.start_time)
        .bind(upsert.finish_time)
        .bind(upsert.metrics.pages)
        .bind(upsert.metrics.items)
        .bind(upsert.metrics.pid)
        .bind(&upsert.metrics.runtime)
        .bind(&upsert.href_log)
        .bind(&upsert.href_items)
        .bind(&upsert.error)
        .bind(upsert.task_id.map(|id| id.to_string()))
        .bind(&upsert.started_by)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("作业写入被忽略: {}", upsert.key);
            Ok(UpsertOutcome::Ignored)
        } else {
            Ok(UpsertOutcome::Written)
        }
    }

    #[instrument(skip(self, payload), fields(job = %key))]
    async fn set_job_error(&self, key: &JobKey, payload: &str) -> FleetResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET error = ?1, status = ?2 WHERE project = ?3 AND job_id = ?4 AND node = ?5",
        )
        .bind(payload)
        .bind(JobStatus::Error.as_str())
        .bind(&key.project)
        .bind(&key.job_id)
        .bind(&key.node)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn list_jobs(&self, node: &str, filter: &JobFilter) -> FleetResult<JobPage> {
        let status = filter.status.map(|s| s.as_str());
        let search = like_pattern(filter.search.as_deref());

        let count_sql = format!("SELECT COUNT(*) FROM jobs {JOB_FILTER}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(node)
            .bind(status)
            .bind(search.as_deref())
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs {JOB_FILTER} \
             ORDER BY COALESCE(start_time, create_time) DESC, id DESC \
             LIMIT ?4 OFFSET ?5"
        );
        let rows = sqlx::query(&sql)
            .bind(node)
            .bind(status)
            .bind(search.as_deref())
            .bind(i64::from(filter.page_size))
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .iter()
            .map(Self::row_to_job)
            .collect::<FleetResult<Vec<_>>>()?;

        Ok(JobPage {
            items,
            total,
            page: filter.page.max(1),
            page_size: filter.page_size,
        })
    }

    #[instrument(skip(self))]
    async fn get_job(&self, id: i64) -> FleetResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self))]
    async fn soft_delete(&self, id: i64) -> FleetResult<()> {
        let result = sqlx::query("UPDATE jobs SET deleted = 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(FleetError::JobNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_stopped(&self, id: i64, actor: Option<&str>) -> FleetResult<()> {
        let result = sqlx::query("UPDATE jobs SET stopped_by = ?1 WHERE id = ?2")
            .bind(actor)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(FleetError::JobNotFound { id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use chrono::{Duration, TimeZone, Utc};
    use fleet_core::models::JobMetrics;

    async fn store() -> (DatabaseManager, SqliteJobStore) {
        let db = DatabaseManager::in_memory().await.unwrap();
        let store = db.job_store();
        (db, store)
    }

    fn running(key: &JobKey, minute: u32, pages: Option<i64>) -> JobUpsert {
        let mut upsert = JobUpsert::new(key.clone(), "books", JobStatus::Running);
        upsert.update_time = Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap());
        upsert.metrics = JobMetrics {
            pages,
            items: pages.map(|p| p * 2),
            pid: Some(4242),
            runtime: None,
        };
        upsert
    }

    #[tokio::test]
    async fn test_insert_then_newer_update() {
        let (_db, store) = store().await;
        let key = JobKey::new("bookstore", "job-1", "node-a");

        assert_eq!(
            store.upsert_job(&running(&key, 0, Some(10))).await.unwrap(),
            UpsertOutcome::Written
        );
        assert_eq!(
            store.upsert_job(&running(&key, 5, Some(20))).await.unwrap(),
            UpsertOutcome::Written
        );

        let page = store.list_jobs("node-a", &JobFilter::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].pages, Some(20));
    }

    #[tokio::test]
    async fn test_older_or_equal_update_is_ignored() {
        let (_db, store) = store().await;
        let key = JobKey::new("bookstore", "job-1", "node-a");

        store.upsert_job(&running(&key, 5, Some(20))).await.unwrap();
        assert_eq!(
            store.upsert_job(&running(&key, 1, Some(5))).await.unwrap(),
            UpsertOutcome::Ignored
        );
        assert_eq!(
            store.upsert_job(&running(&key, 5, Some(7))).await.unwrap(),
            UpsertOutcome::Ignored
        );

        let mut untimed = running(&key, 0, Some(1));
        untimed.update_time = None;
        assert_eq!(
            store.upsert_job(&untimed).await.unwrap(),
            UpsertOutcome::Ignored
        );

        let page = store.list_jobs("node-a", &JobFilter::default()).await.unwrap();
        assert_eq!(page.items[0].pages, Some(20));
    }

    #[tokio::test]
    async fn test_degraded_update_keeps_metrics() {
        let (_db, store) = store().await;
        let key = JobKey::new("bookstore", "job-1", "node-a");
        store.upsert_job(&running(&key, 0, Some(10))).await.unwrap();

        let mut degraded = JobUpsert::new(key.clone(), "books", JobStatus::Finished);
        degraded.update_time = Some(Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap());
        store.upsert_job(&degraded).await.unwrap();

        let job = &store.list_jobs("node-a", &JobFilter::default()).await.unwrap().items[0];
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.pages, Some(10));
        assert_eq!(job.pid, Some(4242));
    }

    #[tokio::test]
    async fn test_scheduled_row_is_overwritten_by_first_report() {
        let (_db, store) = store().await;
        let key = JobKey::new("bookstore", "task_books_node-a_x", "node-a");
        let task_id = Uuid::new_v4();
        let scheduled =
            JobUpsert::scheduled(key.clone(), "books", Some(task_id), None, Utc::now());
        store.upsert_job(&scheduled).await.unwrap();

        let mut report = running(&key, 0, None);
        report.update_time = Some(Utc::now() - Duration::days(1));
        assert_eq!(
            store.upsert_job(&report).await.unwrap(),
            UpsertOutcome::Written
        );

        let job = &store.list_jobs("node-a", &JobFilter::default()).await.unwrap().items[0];
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.task_id, Some(task_id));
        assert!(job.create_time.is_some());
    }

    #[tokio::test]
    async fn test_set_error_soft_delete_and_stop() {
        let (_db, store) = store().await;
        let key = JobKey::new("bookstore", "job-1", "node-a");

        assert!(!store.set_job_error(&key, "ZXJy").await.unwrap());

        store
            .upsert_job(&JobUpsert::scheduled(key.clone(), "books", None, None, Utc::now()))
            .await
            .unwrap();
        assert!(store.set_job_error(&key, "ZXJy").await.unwrap());

        let job = store.list_jobs("node-a", &JobFilter::default()).await.unwrap().items[0].clone();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.decoded_error().as_deref(), Some("err"));

        store.mark_stopped(job.id, Some("admin")).await.unwrap();
        let stopped = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stopped.stopped_by.as_deref(), Some("admin"));

        store.soft_delete(job.id).await.unwrap();
        let page = store.list_jobs("node-a", &JobFilter::default()).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(store.get_job(job.id).await.unwrap().unwrap().deleted);

        assert!(matches!(
            store.soft_delete(9999).await,
            Err(FleetError::JobNotFound { id: 9999 })
        ));
    }

    #[tokio::test]
    async fn test_list_jobs_filters_and_pages() {
        let (_db, store) = store().await;
        for i in 0..5 {
            let key = JobKey::new("bookstore", format!("job-{i}"), "node-a");
            let mut upsert = running(&key, i, None);
            if i % 2 == 0 {
                upsert.status = JobStatus::Finished;
            }
            store.upsert_job(&upsert).await.unwrap();
        }
        store
            .upsert_job(&running(&JobKey::new("bookstore", "other", "node-b"), 0, None))
            .await
            .unwrap();

        let finished = store
            .list_jobs(
                "node-a",
                &JobFilter {
                    status: Some(JobStatus::Finished),
                    page_size: 10,
                    ..JobFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(finished.total, 3);

        let second = store
            .list_jobs(
                "node-a",
                &JobFilter {
                    page: 2,
                    page_size: 2,
                    ..JobFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(second.total, 5);
        assert_eq!(second.items.len(), 2);
    }

    #[tokio::test]
    async fn test_list_jobs_search() {
        let (_db, store) = store().await;
        for (project, spider, job_id) in [
            ("bookstore", "books", "a1"),
            ("bookstore", "authors", "b2"),
            ("news", "headlines", "c3"),
            ("deals", "50%_off", "d4"),
        ] {
            let key = JobKey::new(project, job_id, "node-a");
            let mut upsert = running(&key, 0, None);
            upsert.spider = spider.to_string();
            store.upsert_job(&upsert).await.unwrap();
        }

        let search = |term: &str| JobFilter {
            search: Some(term.to_string()),
            ..JobFilter::default()
        };
        let ids = |page: JobPage| {
            let mut ids: Vec<_> = page.items.into_iter().map(|j| j.job_id).collect();
            ids.sort();
            ids
        };

        let page = store.list_jobs("node-a", &search("BOOK")).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(ids(page), vec!["a1", "b2"]);
        let page = store.list_jobs("node-a", &search("line")).await.unwrap();
        assert_eq!(ids(page), vec!["c3"]);
        let page = store.list_jobs("node-a", &search("c3")).await.unwrap();
        assert_eq!(ids(page), vec!["c3"]);
        let page = store.list_jobs("node-a", &search("%_")).await.unwrap();
        assert_eq!(ids(page), vec!["d4"]);
        let page = store.list_jobs("node-a", &search("  ")).await.unwrap();
        assert_eq!(page.total, 4);
        let page = store.list_jobs("node-b", &search("book")).await.unwrap();
        assert_eq!(page.total, 0);
    }
}
