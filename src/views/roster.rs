//! Weekly service roster.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use super::{LiveSet, LiveView};
use crate::errors::AppError;
use crate::gateway::{week_services_query, week_start, MutationGateway};
use crate::models::{Identity, RoleRestriction, Service, UserProfile, DEFAULT_ROLES};
use crate::rules::{self, RoleRestrictions};
use crate::store::{Collection, Query, SubscriptionError, SubscriptionManager};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSlot {
    pub role: String,
    pub occupant: Option<String>,
    pub mine: bool,
    /// Team id required to fill the role
    pub restricted_to: Option<String>,
    pub can_volunteer: bool,
    pub can_cancel: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterService {
    pub id: String,
    pub date: NaiveDate,
    pub service_type: String,
    pub slots: Vec<RoleSlot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterState {
    pub week_of: NaiveDate,
    pub services: Vec<RosterService>,
    pub can_manage: bool,
}

pub struct RosterView {
    identity: Identity,
    week_of: NaiveDate,
    services: LiveSet<Service>,
    restrictions: LiveSet<RoleRestriction>,
    profile: LiveSet<UserProfile>,
}

impl RosterView {
    /// Mount the roster for the week containing `date`, seeding that week's service if absent.
    pub async fn mount(
        subscriptions: &SubscriptionManager,
        gateway: &MutationGateway,
        identity: Identity,
        date: NaiveDate,
    ) -> Result<Self, AppError> {
        let week_of = week_start(date);
        gateway.ensure_week_service(week_of).await?;

        let services = LiveSet::open(subscriptions, week_services_query(week_of)).await?;
        let restrictions =
            LiveSet::open(subscriptions, Query::collection(Collection::RoleRestrictions)).await?;
        let profile =
            LiveSet::open(subscriptions, Query::by_id(Collection::Users, &identity.id)).await?;

        Ok(Self {
            identity,
            week_of,
            services,
            restrictions,
            profile,
        })
    }

    fn slots(
        &self,
        service: &Service,
        restrictions: &RoleRestrictions,
        profile: Option<&UserProfile>,
    ) -> Vec<RoleSlot> {
        let mut slots: Vec<RoleSlot> = service
            .roles
            .iter()
            .map(|(role, occupant)| {
                let open = occupant.is_none();
                RoleSlot {
                    role: role.clone(),
                    occupant: occupant.clone(),
                    mine: occupant.as_deref() == Some(self.identity.id.as_str()),
                    restricted_to: restrictions.required_team(role).map(str::to_string),
                    can_volunteer: open
                        && profile.is_some_and(|p| {
                            rules::can_volunteer(&self.identity, role, p, restrictions)
                        }),
                    can_cancel: !open && rules::can_cancel_role(&self.identity, service, role),
                }
            })
            .collect();

        // Default roles first in their usual order, custom roles after
        slots.sort_by_key(|slot| {
            let rank = DEFAULT_ROLES
                .iter()
                .position(|r| *r == slot.role)
                .unwrap_or(DEFAULT_ROLES.len());
            (rank, slot.role.clone())
        });
        slots
    }
}

#[async_trait]
impl LiveView for RosterView {
    type Output = RosterState;

    async fn next_change(&mut self) -> Result<(), SubscriptionError> {
        tokio::select! {
            changed = self.services.changed() => changed,
            changed = self.restrictions.changed() => changed,
            changed = self.profile.changed() => changed,
        }
    }

    fn render(&self) -> RosterState {
        let restrictions: RoleRestrictions = self.restrictions.items().iter().cloned().collect();
        let profile = self.profile.get(&self.identity.id);

        let services = self
            .services
            .items()
            .iter()
            .map(|service| RosterService {
                id: service.id.clone(),
                date: service.date,
                service_type: service.service_type.clone(),
                slots: self.slots(service, &restrictions, profile),
            })
            .collect();

        RosterState {
            week_of: self.week_of,
            services,
            can_manage: rules::can_manage_roster(&self.identity),
        }
    }

    fn revision(&self) -> i64 {
        self.services
            .revision()
            .max(self.restrictions.revision())
            .max(self.profile.revision())
    }
}
