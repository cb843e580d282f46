//! RSVP board.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::{LiveSet, LiveView};
use crate::errors::AppError;
use crate::models::{Event, Identity, RsvpResponse};
use crate::rules;
use crate::store::{Collection, Direction, Query, SubscriptionError, SubscriptionManager};
use crate::sweeper::RetentionSweeper;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCard {
    #[serde(flatten)]
    pub event: Event,
    pub my_response: Option<RsvpResponse>,
    pub attendee_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsState {
    pub events: Vec<EventCard>,
    pub can_create: bool,
    pub can_delete: bool,
    /// Set when the expiry sweep on mount failed and expired events may still be listed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_error: Option<String>,
}

pub struct EventsView {
    identity: Identity,
    events: LiveSet<Event>,
    sweep_error: Option<String>,
}

impl EventsView {
    /// Sweep expired events, then subscribe. A failed sweep leaves stale events visible and is reported in the state.
    pub async fn mount(
        subscriptions: &SubscriptionManager,
        sweeper: &RetentionSweeper,
        identity: Identity,
    ) -> Result<Self, AppError> {
        let sweep_error = match sweeper.sweep_expired_events(Utc::now()).await {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Event sweep failed on mount: {}", e);
                Some(e.message())
            }
        };

        let events = LiveSet::open(
            subscriptions,
            Query::collection(Collection::Events).order_by("date", Direction::Asc),
        )
        .await?;

        Ok(Self {
            identity,
            events,
            sweep_error,
        })
    }
}

#[async_trait]
impl LiveView for EventsView {
    type Output = EventsState;

    async fn next_change(&mut self) -> Result<(), SubscriptionError> {
        self.events.changed().await
    }

    fn render(&self) -> EventsState {
        let events = self
            .events
            .items()
            .iter()
            .map(|event| EventCard {
                my_response: event.response_of(&self.identity.id),
                attendee_count: event.attendees.len(),
                event: event.clone(),
            })
            .collect();

        EventsState {
            events,
            can_create: rules::can_create_event(&self.identity),
            can_delete: rules::can_delete_event(&self.identity),
            sweep_error: self.sweep_error.clone(),
        }
    }

    fn revision(&self) -> i64 {
        self.events.revision()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{init_database, DocumentStore, SqliteDocumentStore};
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn member() -> Identity {
        Identity {
            id: "m1".to_string(),
            email: "m1@example.org".to_string(),
            display_name: "Miriam".to_string(),
            is_admin: false,
        }
    }

    async fn setup() -> (Arc<SqliteDocumentStore>, SubscriptionManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("events.sqlite")).await.unwrap();
        let store = Arc::new(SqliteDocumentStore::new(pool));
        let subscriptions = SubscriptionManager::new(store.clone());
        (store, subscriptions, dir)
    }

    #[tokio::test]
    async fn test_failed_sweep_is_reported_in_state() {
        let (_store, subscriptions, dir) = setup().await;
        let unreachable = init_database(&dir.path().join("closed.sqlite")).await.unwrap();
        unreachable.close().await;
        let sweeper = RetentionSweeper::new(
            Arc::new(SqliteDocumentStore::new(unreachable)),
            Duration::hours(48),
        );

        let view = EventsView::mount(&subscriptions, &sweeper, member())
            .await
            .unwrap();
        let state = view.render();

        assert!(state.sweep_error.is_some());
        assert!(state.events.is_empty());
        assert!(serde_json::to_value(&state).unwrap()["sweepError"].is_string());
    }

    #[tokio::test]
    async fn test_successful_sweep_leaves_no_error() {
        let (store, subscriptions, _dir) = setup().await;
        store
            .create(
                Collection::Events,
                "gone",
                json!({ "title": "Old", "date": "2024-01-01T00:00:00Z", "expiryDate": "2024-01-02T00:00:00Z" }),
            )
            .await
            .unwrap();
        let sweeper = RetentionSweeper::new(store.clone(), Duration::hours(48));

        let view = EventsView::mount(&subscriptions, &sweeper, member())
            .await
            .unwrap();
        let state = view.render();

        assert!(state.sweep_error.is_none());
        assert!(state.events.is_empty());
        assert!(serde_json::to_value(&state).unwrap().get("sweepError").is_none());
    }
}
