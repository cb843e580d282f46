//! User and team management screen. Admins only.

use async_trait::async_trait;
use serde::Serialize;

use super::{LiveSet, LiveView};
use crate::errors::AppError;
use crate::models::{Identity, Role, Team, UserProfile};
use crate::rules::{self, require};
use crate::store::{Collection, Direction, Query, SubscriptionError, SubscriptionManager};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserRow {
    #[serde(flatten)]
    pub profile: UserProfile,
    /// Names of the teams in `teams`, dangling ids skipped
    pub team_names: Vec<String>,
    pub removable: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminState {
    pub users: Vec<AdminUserRow>,
    pub teams: Vec<Team>,
}

pub struct AdminView {
    users: LiveSet<UserProfile>,
    teams: LiveSet<Team>,
}

impl AdminView {
    pub async fn mount(
        subscriptions: &SubscriptionManager,
        identity: &Identity,
    ) -> Result<Self, AppError> {
        require(
            rules::can_manage_users(identity),
            "You do not have permission to view this page",
        )?;

        let users = LiveSet::open(
            subscriptions,
            Query::collection(Collection::Users).order_by("displayName", Direction::Asc),
        )
        .await?;
        let teams = LiveSet::open(
            subscriptions,
            Query::collection(Collection::Teams).order_by("name", Direction::Asc),
        )
        .await?;

        Ok(Self { users, teams })
    }
}

#[async_trait]
impl LiveView for AdminView {
    type Output = AdminState;

    async fn next_change(&mut self) -> Result<(), SubscriptionError> {
        tokio::select! {
            changed = self.users.changed() => changed,
            changed = self.teams.changed() => changed,
        }
    }

    fn render(&self) -> AdminState {
        let users = self
            .users
            .items()
            .iter()
            .map(|profile| AdminUserRow {
                team_names: profile
                    .teams
                    .iter()
                    .filter_map(|id| self.teams.get(id).map(|t| t.name.clone()))
                    .collect(),
                removable: profile.role != Role::Admin,
                profile: profile.clone(),
            })
            .collect();

        AdminState {
            users,
            teams: self.teams.items().to_vec(),
        }
    }

    fn revision(&self) -> i64 {
        self.users.revision().max(self.teams.revision())
    }
}
