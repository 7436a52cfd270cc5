//! Durable state of the portal: API definitions, users and requests.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ApiDefinition, ApiId, Request, RequestId, RequestStatus, User, UserId};

mod sqlite;

pub use sqlite::SqliteStore;

/// Errors that can occur in the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database operation failed.
    #[error("a data store operation failed: {0}")]
    Database(#[from] sqlx::Error),

    /// Running the embedded migrations failed.
    #[error("a data migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored JSON column could not be encoded or decoded.
    #[error("failed to serialize or deserialize data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value violates the schema's expectations.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Storage interface used by the portal service and the worker.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts the definition, replacing any existing one with the same id.
    async fn upsert_api(&self, api: &ApiDefinition) -> Result<(), StoreError>;

    async fn get_api(&self, id: ApiId) -> Result<Option<ApiDefinition>, StoreError>;

    /// All definitions, ordered by id.
    async fn list_apis(&self) -> Result<Vec<ApiDefinition>, StoreError>;

    /// Creates the user if needed and replaces its group memberships.
    async fn upsert_user(&self, username: &str, groups: &[String]) -> Result<User, StoreError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Stores a new request stamped with the current time.
    async fn create_request(
        &self,
        owner: UserId,
        api_id: ApiId,
        input_params: &[String],
        status: RequestStatus,
    ) -> Result<Request, StoreError>;

    async fn get_request(&self, id: RequestId) -> Result<Option<Request>, StoreError>;

    /// Requests owned by `owner`, in insertion order.
    async fn list_requests_for(&self, owner: UserId) -> Result<Vec<Request>, StoreError>;

    /// Returns `false` when no request has that id.
    async fn set_request_status(&self, id: RequestId, status: RequestStatus) -> Result<bool, StoreError>;
}
