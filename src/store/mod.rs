//! Document store module.
//!
//! The application treats the store as an opaque CRUD + subscribe API over
//! named collections of schemaless documents. SQLite is the shipped backend.

mod document;
mod sqlite;
pub mod subscription;

pub use document::*;
pub use sqlite::SqliteDocumentStore;
pub use subscription::{Snapshot, Subscription, SubscriptionError, SubscriptionManager};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::broadcast;

/// Errors raised by a [`DocumentStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{} {id} not found", .collection.singular())]
    NotFound { collection: Collection, id: String },

    #[error("{collection} {id}: {field} does not hold the expected value")]
    Occupied {
        collection: Collection,
        id: String,
        field: String,
    },

    #[error("{collection} with key '{key}' already exists")]
    Duplicate { collection: Collection, key: String },

    #[error("{collection} {id}: {message}")]
    InvalidUpdate {
        collection: Collection,
        id: String,
        message: String,
    },

    #[error("{collection} {id} could not be decoded: {message}")]
    Decode {
        collection: Collection,
        id: String,
        message: String,
    },

    #[error("concurrent modification of {collection} {id}")]
    Contention { collection: Collection, id: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Store backend error: {:?}", err);
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(format!("JSON error: {}", err))
    }
}

/// Change notification emitted after every committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub ids: Vec<String>,
    /// Store revision after the write
    pub revision: i64,
}

/// A consistent read: documents together with the revision they were read at.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub revision: i64,
    pub documents: Vec<Document>,
}

/// The document database as seen by the application.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current store revision. Every committed write increments it.
    async fn revision(&self) -> Result<i64, StoreError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError>;

    /// One-shot query.
    async fn query(&self, query: &Query) -> Result<QueryResult, StoreError>;

    /// Insert a new document. Fails with `Duplicate` if the id or unique key is taken.
    async fn create(
        &self,
        collection: Collection,
        id: &str,
        data: Value,
    ) -> Result<Document, StoreError>;

    /// Create or replace a whole document.
    async fn set(&self, collection: Collection, id: &str, data: Value)
        -> Result<Document, StoreError>;

    /// Apply field operations to the current stored copy.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        ops: &[FieldOp],
    ) -> Result<Document, StoreError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;

    /// Delete all ids in one transaction. Returns the number of documents removed.
    async fn batch_delete(&self, collection: Collection, ids: &[String])
        -> Result<usize, StoreError>;

    /// Subscribe to the change feed.
    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL DEFAULT 1,
            revision_id INTEGER NOT NULL DEFAULT 0,
            generated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT OR IGNORE INTO meta (id, schema_version, revision_id, generated_at)
        VALUES (1, 1, 0, datetime('now'));
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            data TEXT NOT NULL,
            unique_key TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (collection, id),
            UNIQUE (collection, unique_key)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_sign_in_at TEXT
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
