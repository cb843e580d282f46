//! Landing screen: greeting, own teams and the next events.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::{LiveSet, LiveView};
use crate::errors::AppError;
use crate::models::{Event, Identity, UserProfile};
use crate::store::{Collection, Direction, Query, SubscriptionError, SubscriptionManager};

/// Number of upcoming events shown on the dashboard.
const UPCOMING_LIMIT: usize = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardState {
    pub greeting_name: String,
    pub is_admin: bool,
    pub team_count: usize,
    pub upcoming_events: Vec<Event>,
    /// Upcoming events the user has joined
    pub attending: usize,
}

pub struct DashboardView {
    identity: Identity,
    profile: LiveSet<UserProfile>,
    events: LiveSet<Event>,
}

impl DashboardView {
    pub async fn mount(
        subscriptions: &SubscriptionManager,
        identity: Identity,
    ) -> Result<Self, AppError> {
        let profile =
            LiveSet::open(subscriptions, Query::by_id(Collection::Users, &identity.id)).await?;
        let events = LiveSet::open(
            subscriptions,
            Query::collection(Collection::Events).order_by("date", Direction::Asc),
        )
        .await?;

        Ok(Self {
            identity,
            profile,
            events,
        })
    }
}

#[async_trait]
impl LiveView for DashboardView {
    type Output = DashboardState;

    async fn next_change(&mut self) -> Result<(), SubscriptionError> {
        tokio::select! {
            changed = self.profile.changed() => changed,
            changed = self.events.changed() => changed,
        }
    }

    fn render(&self) -> DashboardState {
        let profile = self.profile.get(&self.identity.id);
        let display_name = profile
            .map(|p| p.display_name.as_str())
            .unwrap_or(self.identity.display_name.as_str());

        let now = Utc::now();
        let upcoming: Vec<&Event> = self
            .events
            .items()
            .iter()
            .filter(|e| e.expiry_date >= now)
            .collect();

        DashboardState {
            greeting_name: if display_name.trim().is_empty() {
                "Member".to_string()
            } else {
                display_name.to_string()
            },
            is_admin: self.identity.is_admin,
            team_count: profile.map(|p| p.teams.len()).unwrap_or(0),
            attending: upcoming
                .iter()
                .filter(|e| e.attendees.contains(&self.identity.id))
                .count(),
            upcoming_events: upcoming.into_iter().take(UPCOMING_LIMIT).cloned().collect(),
        }
    }

    fn revision(&self) -> i64 {
        self.profile.revision().max(self.events.revision())
    }
}
