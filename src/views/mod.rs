//! Live views.
//!
//! A view opens the subscriptions it needs for one screen, keeps the latest
//! snapshot of each, and renders them into a single serializable state. The
//! same view backs a one-shot JSON response and a server-sent event stream.
//! Dropping a view cancels all of its subscriptions.

mod admin;
mod dashboard;
mod events;
mod roster;
mod teams;

pub use admin::{AdminState, AdminUserRow, AdminView};
pub use dashboard::{DashboardState, DashboardView};
pub use events::{EventCard, EventsState, EventsView};
pub use roster::{RoleSlot, RosterService, RosterState, RosterView};
pub use teams::{TeamsState, TeamsView};

use std::convert::Infallible;

use async_trait::async_trait;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use serde::{de::DeserializeOwned, Serialize};

use crate::api::ApiResponse;
use crate::errors::{AppError, ErrorResponse};
use crate::models::Keyed;
use crate::store::{Query, Snapshot, Subscription, SubscriptionError, SubscriptionManager};

/// The latest snapshot of one subscription.
///
/// Each delivery replaces the documents wholesale; a snapshot older than the
/// one already held is ignored.
pub struct LiveSet<T> {
    subscription: Subscription<T>,
    revision: i64,
    items: Vec<T>,
}

impl<T> LiveSet<T>
where
    T: Keyed + DeserializeOwned + Send + 'static,
{
    /// Subscribe and wait for the initial snapshot.
    pub async fn open(subscriptions: &SubscriptionManager, query: Query) -> Result<Self, AppError> {
        let mut live = Self {
            subscription: subscriptions.subscribe(query),
            revision: -1,
            items: Vec::new(),
        };
        live.changed()
            .await
            .map_err(|e| AppError::Subscription(e.to_string()))?;
        Ok(live)
    }

    /// Wait for the next snapshot newer than the one held.
    pub async fn changed(&mut self) -> Result<(), SubscriptionError> {
        loop {
            match self.subscription.next().await {
                Some(Ok(snapshot)) => {
                    if self.apply(snapshot) {
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Err(SubscriptionError::Closed),
            }
        }
    }

    fn apply(&mut self, snapshot: Snapshot<T>) -> bool {
        if snapshot.revision < self.revision {
            return false;
        }
        self.revision = snapshot.revision;
        self.items = snapshot.documents;
        true
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|item| item.key() == id)
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }
}

/// A mounted screen that re-renders whenever one of its subscriptions delivers.
#[async_trait]
pub trait LiveView: Send {
    type Output: Serialize + Send;

    /// Wait until the view state has moved on.
    async fn next_change(&mut self) -> Result<(), SubscriptionError>;

    fn render(&self) -> Self::Output;

    /// Highest store revision reflected in the view.
    fn revision(&self) -> i64;
}

/// Stream a view as server-sent events: one `snapshot` event per state change.
pub fn into_sse<V>(view: V) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send>
where
    V: LiveView + 'static,
{
    let events = stream::unfold(Some((view, true)), |state| async move {
        let (mut view, initial) = state?;

        if !initial {
            if let Err(err) = view.next_change().await {
                tracing::warn!("Live view subscription failed: {}", err);
                let event = error_event(&AppError::Subscription(err.to_string()), view.revision());
                let next = match err {
                    SubscriptionError::Closed => None,
                    SubscriptionError::Query(_) => Some((view, false)),
                };
                return Some((Ok(event), next));
            }
        }

        let event = snapshot_event(view.revision(), &view.render());
        Some((Ok(event), Some((view, false))))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn snapshot_event<T: Serialize>(revision: i64, state: &T) -> Event {
    Event::default()
        .event("snapshot")
        .id(revision.to_string())
        .json_data(ApiResponse::new(state, revision))
        .unwrap_or_else(|e| {
            tracing::error!("Failed to encode view state: {}", e);
            Event::default().event("error").data(e.to_string())
        })
}

fn error_event(error: &AppError, revision: i64) -> Event {
    Event::default()
        .event("error")
        .json_data(ErrorResponse::new(error, revision))
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Wait on a subscription that may not be open. Pending forever when absent.
async fn next_optional<T>(live: &mut Option<LiveSet<T>>) -> Result<(), SubscriptionError>
where
    T: Keyed + DeserializeOwned + Send + 'static,
{
    match live {
        Some(live) => live.changed().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Team;
    use crate::store::{init_database, Collection, Direction, DocumentStore, SqliteDocumentStore};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn setup() -> (Arc<SqliteDocumentStore>, SubscriptionManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("views.sqlite")).await.unwrap();
        let store = Arc::new(SqliteDocumentStore::new(pool));
        let subscriptions = SubscriptionManager::new(store.clone());
        (store, subscriptions, dir)
    }

    fn team(name: &str) -> serde_json::Value {
        json!({ "name": name, "createdAt": "2025-01-01T00:00:00Z" })
    }

    #[tokio::test]
    async fn test_live_set_follows_store() {
        let (store, subscriptions, _dir) = setup().await;
        store.create(Collection::Teams, "t1", team("Media")).await.unwrap();

        let query = Query::collection(Collection::Teams).order_by("name", Direction::Asc);
        let mut live: LiveSet<Team> = LiveSet::open(&subscriptions, query).await.unwrap();
        assert_eq!(live.items().len(), 1);

        store.create(Collection::Teams, "t2", team("Greeting")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), live.changed())
            .await
            .unwrap()
            .unwrap();

        let names: Vec<_> = live.items().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Greeting", "Media"]);
        assert_eq!(live.get("t1").map(|t| t.name.as_str()), Some("Media"));
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_ignored() {
        let (store, subscriptions, _dir) = setup().await;
        store.create(Collection::Teams, "t1", team("Media")).await.unwrap();

        let mut live: LiveSet<Team> =
            LiveSet::open(&subscriptions, Query::collection(Collection::Teams))
                .await
                .unwrap();
        let current = live.revision();

        assert!(!live.apply(Snapshot {
            revision: current - 1,
            documents: Vec::new(),
        }));
        assert_eq!(live.items().len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_live_set_cancels_subscription() {
        let (_store, subscriptions, _dir) = setup().await;
        let live: LiveSet<Team> =
            LiveSet::open(&subscriptions, Query::collection(Collection::Teams))
                .await
                .unwrap();
        assert_eq!(subscriptions.active_count(), 1);
        drop(live);
        assert_eq!(subscriptions.active_count(), 0);
    }
}
