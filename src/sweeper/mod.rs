//! Retention sweeper.
//!
//! Deletes expired events and stale chat messages. Runs when the events or
//! teams view is mounted; each sweep is one query plus one batch delete.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;

use crate::errors::AppError;
use crate::store::{Collection, DocumentStore, Filter, Query};

/// Result of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub collection: Collection,
    pub deleted: usize,
}

#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn DocumentStore>,
    message_retention: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn DocumentStore>, message_retention: Duration) -> Self {
        Self {
            store,
            message_retention,
        }
    }

    /// Delete events whose expiry date is before `now`.
    pub async fn sweep_expired_events(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        self.sweep(
            Query::collection(Collection::Events).filter(Filter::lt("expiryDate", timestamp(now))),
        )
        .await
    }

    /// Delete messages older than the retention window.
    pub async fn sweep_stale_messages(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let cutoff = now - self.message_retention;
        self.sweep(
            Query::collection(Collection::Messages).filter(Filter::lt("timestamp", timestamp(cutoff))),
        )
        .await
    }

    async fn sweep(&self, query: Query) -> Result<SweepReport, AppError> {
        let collection = query.collection;
        let ids: Vec<String> = self
            .store
            .query(&query)
            .await?
            .documents
            .into_iter()
            .map(|doc| doc.id)
            .collect();

        let deleted = if ids.is_empty() {
            0
        } else {
            self.store
                .batch_delete(collection, &ids)
                .await
                .map_err(AppError::write)?
        };

        if deleted > 0 {
            tracing::info!(collection = %collection, deleted, "Retention sweep removed documents");
        } else {
            tracing::debug!(collection = %collection, "Retention sweep found nothing");
        }

        Ok(SweepReport {
            collection,
            deleted,
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
