//! Team chat.
//!
//! The channel of the selected team is only subscribed while the profile
//! grants access. Losing membership closes the channel subscription on the
//! next profile snapshot; gaining it opens one.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::{next_optional, LiveSet, LiveView};
use crate::errors::AppError;
use crate::models::{Identity, Message, Team, UserProfile};
use crate::rules;
use crate::store::{Collection, Direction, Filter, Query, SubscriptionError, SubscriptionManager};
use crate::sweeper::RetentionSweeper;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamsState {
    /// Teams the user belongs to
    pub teams: Vec<Team>,
    pub active_team: Option<Team>,
    pub can_view: bool,
    pub can_post: bool,
    pub messages: Vec<Message>,
    /// Set when the message sweep on mount failed and stale messages may still be listed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_error: Option<String>,
}

pub struct TeamsView {
    identity: Identity,
    subscriptions: SubscriptionManager,
    selected: Option<String>,
    profile: LiveSet<UserProfile>,
    teams: LiveSet<Team>,
    messages: Option<LiveSet<Message>>,
    sweep_error: Option<String>,
}

enum Changed {
    Profile,
    Other,
}

impl TeamsView {
    /// Sweep stale messages, then subscribe to the user's teams and the selected channel.
    pub async fn mount(
        subscriptions: &SubscriptionManager,
        sweeper: &RetentionSweeper,
        identity: Identity,
        selected: Option<String>,
    ) -> Result<Self, AppError> {
        let sweep_error = match sweeper.sweep_stale_messages(Utc::now()).await {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Message sweep failed on mount: {}", e);
                Some(e.message())
            }
        };

        let profile =
            LiveSet::open(subscriptions, Query::by_id(Collection::Users, &identity.id)).await?;
        let teams = LiveSet::open(
            subscriptions,
            Query::collection(Collection::Teams).order_by("name", Direction::Asc),
        )
        .await?;

        let mut view = Self {
            identity,
            subscriptions: subscriptions.clone(),
            selected: selected.filter(|t| !t.is_empty()),
            profile,
            teams,
            messages: None,
            sweep_error,
        };
        view.sync_channel().await?;
        Ok(view)
    }

    fn channel_allowed(&self) -> bool {
        match (&self.selected, self.profile.get(&self.identity.id)) {
            (Some(team_id), Some(profile)) => {
                rules::can_view_channel(&self.identity, team_id, profile)
            }
            _ => false,
        }
    }

    /// Open or close the channel subscription to match current access.
    async fn sync_channel(&mut self) -> Result<(), AppError> {
        let allowed = self.channel_allowed();

        match (&self.selected, allowed, self.messages.is_some()) {
            (Some(team_id), true, false) => {
                let query = Query::collection(Collection::Messages)
                    .filter(Filter::eq("teamId", team_id.as_str()))
                    .order_by("timestamp", Direction::Asc);
                self.messages = Some(LiveSet::open(&self.subscriptions, query).await?);
                tracing::debug!(team_id = %team_id, user_id = %self.identity.id, "Channel opened");
            }
            (_, false, true) => {
                self.messages = None;
                tracing::debug!(user_id = %self.identity.id, "Channel access lost, closed");
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl LiveView for TeamsView {
    type Output = TeamsState;

    async fn next_change(&mut self) -> Result<(), SubscriptionError> {
        let changed = tokio::select! {
            changed = self.profile.changed() => changed.map(|_| Changed::Profile),
            changed = self.teams.changed() => changed.map(|_| Changed::Other),
            changed = next_optional(&mut self.messages) => changed.map(|_| Changed::Other),
        }?;

        if let Changed::Profile = changed {
            self.sync_channel()
                .await
                .map_err(|e| SubscriptionError::Query(e.message()))?;
        }
        Ok(())
    }

    fn render(&self) -> TeamsState {
        let profile = self.profile.get(&self.identity.id);
        let teams: Vec<Team> = self
            .teams
            .items()
            .iter()
            .filter(|team| profile.is_some_and(|p| p.is_member_of(&team.id)))
            .cloned()
            .collect();

        let active_team = self
            .selected
            .as_deref()
            .and_then(|id| self.teams.get(id))
            .cloned();

        let can_view = self.channel_allowed();
        let can_post = match (&self.selected, profile) {
            (Some(team_id), Some(profile)) => {
                rules::can_post_in_channel(&self.identity, team_id, profile)
            }
            _ => false,
        };

        let messages = match (&self.messages, can_view) {
            (Some(live), true) => live.items().to_vec(),
            _ => Vec::new(),
        };

        TeamsState {
            teams,
            active_team,
            can_view,
            can_post,
            messages,
            sweep_error: self.sweep_error.clone(),
        }
    }

    fn revision(&self) -> i64 {
        let base = self.profile.revision().max(self.teams.revision());
        self.messages
            .as_ref()
            .map_or(base, |live| base.max(live.revision()))
    }
}
