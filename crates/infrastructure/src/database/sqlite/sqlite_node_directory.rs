use async_trait::async_trait;
use chrono::Utc;
use fleet_core::{models::Node, traits::NodeDirectory, FleetError, FleetResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{info, instrument};

pub struct SqliteNodeDirectory {
    pool: SqlitePool,
}

impl SqliteNodeDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_node(row: &SqliteRow) -> FleetResult<Node> {
        Ok(Node {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            username: row.try_get("username")?,
            password: row.try_get("password")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}

#[async_trait]
impl NodeDirectory for SqliteNodeDirectory {
    #[instrument(skip(self))]
    async fn get_node(&self, name: &str) -> FleetResult<Node> {
        let row = sqlx::query(
            "SELECT id, name, url, username, password, created_at FROM nodes WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_node(&row),
            None => Err(FleetError::NodeNotFound {
                name: name.to_string(),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn list_nodes(&self) -> FleetResult<Vec<Node>> {
        let rows = sqlx::query(
            "SELECT id, name, url, username, password, created_at FROM nodes ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_node).collect()
    }

    #[instrument(skip(self, encrypted_password))]
    async fn add_node(
        &self,
        name: &str,
        url: &str,
        username: Option<&str>,
        encrypted_password: Option<Vec<u8>>,
    ) -> FleetResult<Node> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO nodes (name, url, username, password, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(name)
        .bind(url)
        .bind(username)
        .bind(encrypted_password.as_deref())
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if Self::is_unique_violation(&e) {
                FleetError::validation(format!("节点名称已存在: {name}"))
            } else {
                FleetError::Database(e)
            }
        })?;

        info!("节点已注册: {} -> {}", name, url);
        Ok(Node {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            url: url.to_string(),
            username: username.map(str::to_string),
            password: encrypted_password,
            created_at,
        })
    }

    #[instrument(skip(self, encrypted_password))]
    async fn update_credentials(
        &self,
        name: &str,
        username: Option<&str>,
        encrypted_password: Option<Vec<u8>>,
    ) -> FleetResult<()> {
        let result = sqlx::query("UPDATE nodes SET username = ?1, password = ?2 WHERE name = ?3")
            .bind(username)
            .bind(encrypted_password.as_deref())
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(FleetError::NodeNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_node(&self, name: &str) -> FleetResult<()> {
        let result = sqlx::query("DELETE FROM nodes WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(FleetError::NodeNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}
