use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use fleet_core::config::models::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::sqlite::{SqliteJobStore, SqliteNodeDirectory, SqliteTaskRepository};

/// SQLite 连接池与表结构管理
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("无效的数据库URL: {}", config.url))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(connect_options)
            .await
            .context("连接数据库失败")?;

        let manager = Self { pool };
        manager.migrate().await?;
        Ok(manager)
    }

    /// 单连接内存数据库，连接关闭后数据即丢失
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("创建内存数据库失败")?;

        let manager = Self { pool };
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn job_store(&self) -> SqliteJobStore {
        SqliteJobStore::new(self.pool.clone())
    }

    pub fn task_repository(&self) -> SqliteTaskRepository {
        SqliteTaskRepository::new(self.pool.clone())
    }

    pub fn node_directory(&self) -> SqliteNodeDirectory {
        SqliteNodeDirectory::new(self.pool.clone())
    }

    /// 创建表结构，可重复执行
    pub async fn migrate(&self) -> Result<()> {
        debug!("开始初始化SQLite表结构");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL,
                username TEXT,
                password BLOB,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                project TEXT NOT NULL,
                spider TEXT NOT NULL,
                node TEXT NOT NULL,
                cron TEXT NOT NULL,
                args TEXT NOT NULL DEFAULT '',
                paused INTEGER NOT NULL DEFAULT 0,
                created_by TEXT,
                modified_by TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project TEXT NOT NULL,
                spider TEXT NOT NULL,
                job_id TEXT NOT NULL,
                node TEXT NOT NULL,
                status TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                create_time DATETIME,
                update_time DATETIME,
                start_time DATETIME,
                finish_time DATETIME,
                pages INTEGER,
                items INTEGER,
                pid INTEGER,
                runtime TEXT,
                href_log TEXT,
                href_items TEXT,
                error TEXT,
                task_id TEXT,
                started_by TEXT,
                stopped_by TEXT,
                UNIQUE (project, job_id, node)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_jobs_node ON jobs(node, deleted)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_paused ON tasks(paused)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(&self.pool).await?;
        }

        info!("数据库表结构初始化完成");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
