use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::{Store, StoreError};
use crate::models::{ApiDefinition, ApiId, Request, RequestId, RequestStatus, User, UserId};

// Helper struct for mapping from the database row
#[derive(sqlx::FromRow)]
struct ApiRow {
    id: i64,
    name: String,
    description: String,
    command: String,
    num_input_params: i64,
    output_files: String,
    authorized_groups: String,
}

impl TryFrom<ApiRow> for ApiDefinition {
    type Error = StoreError;

    fn try_from(row: ApiRow) -> Result<Self, Self::Error> {
        let num_input_params = u32::try_from(row.num_input_params).map_err(|_| {
            StoreError::Corrupt(format!("api {} has parameter count {}", row.id, row.num_input_params))
        })?;
        Ok(ApiDefinition {
            id: row.id,
            name: row.name,
            description: row.description,
            command: row.command,
            num_input_params,
            output_files: serde_json::from_str(&row.output_files)?,
            authorized_groups: serde_json::from_str(&row.authorized_groups)?,
        })
    }
}

// Helper struct for mapping from the database row
#[derive(sqlx::FromRow)]
struct RequestRow {
    id: i64,
    owner_id: i64,
    api_id: i64,
    input_params: String,
    status: String,
    date_added: DateTime<Utc>,
}

impl TryFrom<RequestRow> for Request {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(Request {
            id: row.id,
            owner: row.owner_id,
            api_id: row.api_id,
            input_params: serde_json::from_str(&row.input_params)?,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            date_added: row.date_added,
        })
    }
}

// An in-memory database lives exactly as long as its connection, so that
// connection must never be recycled.
fn pool_options(database_url: &str) -> SqlitePoolOptions {
    if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    }
}

/// SQLite backed [`Store`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to `database_url`, creating the database file if it does not
    /// exist. In-memory databases are pinned to a single connection so every
    /// query sees the same data.
    #[tracing::instrument(level = "info")]
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = pool_options(database_url).connect_with(options).await?;
        tracing::info!(database_url, "Connected to SQLite database.");
        Ok(Self { pool })
    }

    #[tracing::instrument(skip(self), level = "info")]
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run database migrations.");
            e
        })?;
        tracing::info!("Database migrations completed successfully.");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn groups_of(&self, user_id: UserId) -> Result<Vec<String>, StoreError> {
        let groups = sqlx::query_scalar::<_, String>(
            "SELECT group_name FROM user_groups WHERE user_id = ? ORDER BY group_name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }
}

#[async_trait]
impl Store for SqliteStore {
    #[tracing::instrument(skip(self, api), fields(api_id = api.id), level = "debug")]
    async fn upsert_api(&self, api: &ApiDefinition) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO apis (id, name, description, command, num_input_params, output_files, authorized_groups)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                command = excluded.command,
                num_input_params = excluded.num_input_params,
                output_files = excluded.output_files,
                authorized_groups = excluded.authorized_groups",
        )
        .bind(api.id)
        .bind(&api.name)
        .bind(&api.description)
        .bind(&api.command)
        .bind(i64::from(api.num_input_params))
        .bind(serde_json::to_string(&api.output_files)?)
        .bind(serde_json::to_string(&api.authorized_groups)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_api(&self, id: ApiId) -> Result<Option<ApiDefinition>, StoreError> {
        let row = sqlx::query_as::<_, ApiRow>("SELECT * FROM apis WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ApiDefinition::try_from).transpose()
    }

    async fn list_apis(&self) -> Result<Vec<ApiDefinition>, StoreError> {
        sqlx::query_as::<_, ApiRow>("SELECT * FROM apis ORDER BY id")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ApiDefinition::try_from)
            .collect()
    }

    #[tracing::instrument(skip(self, groups), level = "debug")]
    async fn upsert_user(&self, username: &str, groups: &[String]) -> Result<User, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO users (username) VALUES (?) ON CONFLICT(username) DO NOTHING")
            .bind(username)
            .execute(&mut *tx)
            .await?;
        let id: i64 = sqlx::query_scalar("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM user_groups WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for group in groups {
            sqlx::query("INSERT OR IGNORE INTO user_groups (user_id, group_name) VALUES (?, ?)")
                .bind(id)
                .bind(group)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let mut groups = groups.to_vec();
        groups.sort();
        groups.dedup();
        Ok(User { id, username: username.to_string(), groups })
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let username = sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match username {
            Some(username) => Ok(Some(User { id, username, groups: self.groups_of(id).await? })),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, input_params), level = "debug")]
    async fn create_request(
        &self,
        owner: UserId,
        api_id: ApiId,
        input_params: &[String],
        status: RequestStatus,
    ) -> Result<Request, StoreError> {
        let date_added = Utc::now();
        let result = sqlx::query(
            "INSERT INTO requests (owner_id, api_id, input_params, status, date_added) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(owner)
        .bind(api_id)
        .bind(serde_json::to_string(input_params)?)
        .bind(status.as_str())
        .bind(date_added)
        .execute(&self.pool)
        .await?;

        Ok(Request {
            id: result.last_insert_rowid(),
            owner,
            api_id,
            input_params: input_params.to_vec(),
            status,
            date_added,
        })
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<Request>, StoreError> {
        let row = sqlx::query_as::<_, RequestRow>("SELECT * FROM requests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Request::try_from).transpose()
    }

    async fn list_requests_for(&self, owner: UserId) -> Result<Vec<Request>, StoreError> {
        sqlx::query_as::<_, RequestRow>("SELECT * FROM requests WHERE owner_id = ? ORDER BY id")
            .bind(owner)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Request::try_from)
            .collect()
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn set_request_status(&self, id: RequestId, status: RequestStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE requests SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
