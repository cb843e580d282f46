//! SQLite-backed document store.
//!
//! Documents live in one table keyed by `(collection, id)` with their body as
//! JSON text. Every write opens a transaction that first bumps the global
//! revision, which takes SQLite's write lock before the document is read, so
//! field operations always apply to the latest committed copy.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::broadcast;

use super::{
    apply_ops, ChangeEvent, Collection, Document, DocumentStore, FieldOp, OpError, Query,
    QueryResult, StoreError,
};

/// Number of change events buffered per subscriber before it lags.
const CHANGE_FEED_CAPACITY: usize = 256;

/// Document store persisted in SQLite.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, changes }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn publish(&self, collection: Collection, ids: Vec<String>, revision: i64) {
        tracing::trace!(%collection, revision, count = ids.len(), "Publishing change");
        // No receivers simply means no live subscriptions
        let _ = self.changes.send(ChangeEvent {
            collection,
            ids,
            revision,
        });
    }
}

/// Increment the revision inside a write transaction and return the new value.
async fn bump_revision(conn: &mut SqliteConnection) -> Result<i64, StoreError> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
        .bind(&now)
        .execute(&mut *conn)
        .await?;
    let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.get("revision_id"))
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn revision(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(
            "SELECT id, data, version FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| document_from_row(collection, &r)).transpose()
    }

    async fn query(&self, query: &Query) -> Result<QueryResult, StoreError> {
        let collection = query.collection;

        // One read transaction so the revision matches the documents
        let mut tx = self.pool.begin().await?;

        let revision: i64 = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?
            .get("revision_id");

        let rows = match query.pinned_id() {
            Some(id) => {
                sqlx::query(
                    "SELECT id, data, version FROM documents WHERE collection = ? AND id = ?",
                )
                .bind(collection.as_str())
                .bind(id)
                .fetch_all(&mut *tx)
                .await?
            }
            None => {
                sqlx::query("SELECT id, data, version FROM documents WHERE collection = ?")
                    .bind(collection.as_str())
                    .fetch_all(&mut *tx)
                    .await?
            }
        };

        tx.commit().await?;

        let documents = rows
            .iter()
            .map(|row| document_from_row(collection, row))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QueryResult {
            revision,
            documents: query.apply(documents),
        })
    }

    async fn create(
        &self,
        collection: Collection,
        id: &str,
        data: Value,
    ) -> Result<Document, StoreError> {
        let unique_key = collection.unique_key(&data);
        let body = serde_json::to_string(&data)?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        let revision = bump_revision(&mut tx).await?;

        sqlx::query(
            "INSERT INTO documents (collection, id, data, unique_key, version, updated_at) VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(&body)
        .bind(&unique_key)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, collection, id, unique_key.as_deref()))?;

        tx.commit().await?;
        self.publish(collection, vec![id.to_string()], revision);

        Ok(Document {
            collection,
            id: id.to_string(),
            data,
            version: 1,
        })
    }

    async fn set(
        &self,
        collection: Collection,
        id: &str,
        data: Value,
    ) -> Result<Document, StoreError> {
        let unique_key = collection.unique_key(&data);
        let body = serde_json::to_string(&data)?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        let revision = bump_revision(&mut tx).await?;

        let row = sqlx::query(
            r#"INSERT INTO documents (collection, id, data, unique_key, version, updated_at)
               VALUES (?, ?, ?, ?, 1, ?)
               ON CONFLICT (collection, id) DO UPDATE SET
                   data = excluded.data,
                   unique_key = excluded.unique_key,
                   version = documents.version + 1,
                   updated_at = excluded.updated_at
               RETURNING version"#,
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(&body)
        .bind(&unique_key)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| write_error(e, collection, id, unique_key.as_deref()))?;

        tx.commit().await?;
        self.publish(collection, vec![id.to_string()], revision);

        Ok(Document {
            collection,
            id: id.to_string(),
            data,
            version: row.get("version"),
        })
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        ops: &[FieldOp],
    ) -> Result<Document, StoreError> {
        let mut tx = self.pool.begin().await?;
        let revision = bump_revision(&mut tx).await?;

        let row = sqlx::query(
            "SELECT id, data, version FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            collection,
            id: id.to_string(),
        })?;

        let mut document = document_from_row(collection, &row)?;

        apply_ops(&mut document.data, ops).map_err(|e| match e {
            OpError::Precondition(field) => StoreError::Occupied {
                collection,
                id: id.to_string(),
                field,
            },
            OpError::Shape(message) => StoreError::InvalidUpdate {
                collection,
                id: id.to_string(),
                message,
            },
        })?;

        let unique_key = collection.unique_key(&document.data);
        let body = serde_json::to_string(&document.data)?;
        let now = Utc::now().to_rfc3339();

        // Conditional UPDATE with version check as a guard against writers outside this process
        let result = sqlx::query(
            "UPDATE documents SET data = ?, unique_key = ?, version = version + 1, updated_at = ? WHERE collection = ? AND id = ? AND version = ?",
        )
        .bind(&body)
        .bind(&unique_key)
        .bind(&now)
        .bind(collection.as_str())
        .bind(id)
        .bind(document.version)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, collection, id, unique_key.as_deref()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Contention {
                collection,
                id: id.to_string(),
            });
        }

        tx.commit().await?;
        self.publish(collection, vec![id.to_string()], revision);

        document.version += 1;
        Ok(document)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let revision = bump_revision(&mut tx).await?;

        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            });
        }

        tx.commit().await?;
        self.publish(collection, vec![id.to_string()], revision);
        Ok(())
    }

    async fn batch_delete(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        // Use a transaction for atomicity
        let mut tx = self.pool.begin().await?;
        let revision = bump_revision(&mut tx).await?;

        let mut deleted = 0u64;
        for id in ids {
            let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
                .bind(collection.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }

        tx.commit().await?;
        self.publish(collection, ids.to_vec(), revision);

        Ok(deleted as usize)
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

fn document_from_row(collection: Collection, row: &SqliteRow) -> Result<Document, StoreError> {
    let id: String = row.get("id");
    let body: String = row.get("data");
    let data = serde_json::from_str(&body).map_err(|e| StoreError::Decode {
        collection,
        id: id.clone(),
        message: e.to_string(),
    })?;

    Ok(Document {
        collection,
        id,
        data,
        version: row.get("version"),
    })
}

/// Map unique-constraint violations to `Duplicate`, naming the key that collided.
fn write_error(
    err: sqlx::Error,
    collection: Collection,
    id: &str,
    unique_key: Option<&str>,
) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let key = match unique_key {
                Some(key) if db.message().contains("unique_key") => key,
                _ => id,
            };
            return StoreError::Duplicate {
                collection,
                key: key.to_string(),
            };
        }
    }
    err.into()
}
