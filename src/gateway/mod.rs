//! Mutation gateway.
//!
//! Every state-changing action passes through here: the authorization
//! predicate runs first, then the change goes to the store as field-level
//! operations on the freshest stored copy. Shared sets (`teams`,
//! `attendees`, `declined`) and role slots are never overwritten wholesale.

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::{
    CreateEventRequest, CreateServiceRequest, Event, Identity, Message, Role, RoleRestriction,
    RsvpResponse, Service, Team, UserProfile, DEFAULT_ROLES, DEFAULT_SERVICE_TYPE,
    MAX_MESSAGE_LEN,
};
use crate::rules::{self, require, RoleRestrictions};
use crate::store::{
    to_body, Collection, Direction, DocumentStore, FieldOp, FieldPath, Filter, Query, StoreError,
};

/// Id of the automatically seeded service for the week starting on `sunday`.
pub fn week_service_id(sunday: NaiveDate) -> String {
    format!("service-{}", sunday.format("%Y-%m-%d"))
}

/// The Sunday starting the week that contains `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

/// Services dated within the week starting on `sunday`, earliest first.
pub fn week_services_query(sunday: NaiveDate) -> Query {
    Query::collection(Collection::Services)
        .filter(Filter::gte("date", sunday.to_string()))
        .filter(Filter::lt("date", (sunday + Duration::days(7)).to_string()))
        .order_by("date", Direction::Asc)
}

/// What a team deletion cleaned up besides the team itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamCleanup {
    pub members: usize,
    pub restrictions: usize,
    pub messages: usize,
}

#[derive(Clone)]
pub struct MutationGateway {
    store: Arc<dyn DocumentStore>,
}

impl MutationGateway {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    // ==================== USERS & TEAMS ====================

    pub async fn add_team_member(
        &self,
        actor: &Identity,
        user_id: &str,
        team_id: &str,
    ) -> Result<UserProfile, AppError> {
        require(
            rules::can_manage_teams(actor),
            "Only admins can change team membership",
        )?;
        self.load::<Team>(Collection::Teams, team_id).await?;

        let doc = self
            .store
            .update(Collection::Users, user_id, &[FieldOp::add_to_set("teams", team_id)])
            .await
            .map_err(AppError::write)?;

        tracing::info!(user_id, team_id, actor = %actor.id, "Team member added");
        Ok(doc.decode()?)
    }

    pub async fn remove_team_member(
        &self,
        actor: &Identity,
        user_id: &str,
        team_id: &str,
    ) -> Result<UserProfile, AppError> {
        require(
            rules::can_manage_teams(actor),
            "Only admins can change team membership",
        )?;

        let doc = self
            .store
            .update(
                Collection::Users,
                user_id,
                &[FieldOp::remove_from_set("teams", team_id)],
            )
            .await
            .map_err(AppError::write)?;

        tracing::info!(user_id, team_id, actor = %actor.id, "Team member removed");
        Ok(doc.decode()?)
    }

    /// Remove a profile. Admin profiles cannot be removed.
    pub async fn delete_user(&self, actor: &Identity, user_id: &str) -> Result<(), AppError> {
        require(rules::can_manage_users(actor), "Only admins can remove users")?;

        let profile: UserProfile = self.load(Collection::Users, user_id).await?;
        if profile.role == Role::Admin {
            return Err(AppError::Validation(
                "Admin accounts cannot be removed".to_string(),
            ));
        }

        self.store
            .delete(Collection::Users, user_id)
            .await
            .map_err(AppError::write)?;

        tracing::info!(user_id, actor = %actor.id, "User removed");
        Ok(())
    }

    pub async fn create_team(&self, actor: &Identity, name: &str) -> Result<Team, AppError> {
        require(rules::can_manage_teams(actor), "Only admins can create teams")?;
        let name = validate_team_name(name)?;
        self.ensure_team_name_free(&name, None).await?;

        let team = Team {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            created_at: Utc::now(),
        };

        // The store's unique key settles simultaneous creations of the same name
        self.store
            .create(Collection::Teams, &team.id, body(&team)?)
            .await
            .map_err(|e| team_name_error(e, &team.name))?;

        tracing::info!(team_id = %team.id, name = %team.name, "Team created");
        Ok(team)
    }

    pub async fn rename_team(
        &self,
        actor: &Identity,
        team_id: &str,
        name: &str,
    ) -> Result<Team, AppError> {
        require(rules::can_manage_teams(actor), "Only admins can rename teams")?;
        let name = validate_team_name(name)?;
        self.ensure_team_name_free(&name, Some(team_id)).await?;

        let doc = self
            .store
            .update(Collection::Teams, team_id, &[FieldOp::set("name", name.as_str())])
            .await
            .map_err(|e| team_name_error(e, &name))?;

        tracing::info!(team_id, name = %name, "Team renamed");
        Ok(doc.decode()?)
    }

    /// Delete a team and everything that refers to it.
    pub async fn delete_team(
        &self,
        actor: &Identity,
        team_id: &str,
    ) -> Result<TeamCleanup, AppError> {
        require(rules::can_manage_teams(actor), "Only admins can delete teams")?;
        self.load::<Team>(Collection::Teams, team_id).await?;

        // References go first so a failed deletion can be retried to completion
        let mut cleanup = TeamCleanup::default();

        let members = self
            .store
            .query(
                &Query::collection(Collection::Users)
                    .filter(Filter::array_contains("teams", team_id)),
            )
            .await?;
        for member in members.documents {
            match self
                .store
                .update(
                    Collection::Users,
                    &member.id,
                    &[FieldOp::remove_from_set("teams", team_id)],
                )
                .await
            {
                Ok(_) => cleanup.members += 1,
                // Deleted concurrently, nothing left to clean
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(AppError::write(e)),
            }
        }

        cleanup.restrictions = self
            .delete_matching(
                Query::collection(Collection::RoleRestrictions).filter(Filter::eq("teamId", team_id)),
            )
            .await?;
        cleanup.messages = self
            .delete_matching(
                Query::collection(Collection::Messages).filter(Filter::eq("teamId", team_id)),
            )
            .await?;

        self.store
            .delete(Collection::Teams, team_id)
            .await
            .map_err(AppError::write)?;

        tracing::info!(
            team_id,
            members = cleanup.members,
            restrictions = cleanup.restrictions,
            messages = cleanup.messages,
            "Team deleted"
        );
        Ok(cleanup)
    }

    // ==================== EVENTS ====================

    pub async fn create_event(
        &self,
        actor: &Identity,
        request: CreateEventRequest,
    ) -> Result<Event, AppError> {
        require(rules::can_create_event(actor), "Only admins can create events")?;

        let title = request.title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Event title is required".to_string()));
        }
        if let Some(location) = request.locations.iter().find(|l| !l.coordinates.is_valid()) {
            return Err(AppError::Validation(format!(
                "Location '{}' has invalid coordinates",
                location.name
            )));
        }

        let expiry_date = request
            .expiry_date
            .unwrap_or(request.date + Duration::days(1));
        if expiry_date < request.date {
            return Err(AppError::Validation(
                "Expiry date must not be before the event date".to_string(),
            ));
        }

        let event = Event {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            date: request.date,
            description: request.description.trim().to_string(),
            expiry_date,
            locations: request.locations,
            attendees: Vec::new(),
            declined: Vec::new(),
            created_by: actor.id.clone(),
        };

        self.store
            .create(Collection::Events, &event.id, body(&event)?)
            .await
            .map_err(AppError::write)?;

        tracing::info!(event_id = %event.id, title = %event.title, "Event created");
        Ok(event)
    }

    pub async fn delete_event(&self, actor: &Identity, event_id: &str) -> Result<(), AppError> {
        require(rules::can_delete_event(actor), "Only admins can delete events")?;

        self.store
            .delete(Collection::Events, event_id)
            .await
            .map_err(AppError::write)?;

        tracing::info!(event_id, "Event deleted");
        Ok(())
    }

    pub async fn rsvp(
        &self,
        actor: &Identity,
        event_id: &str,
        response: RsvpResponse,
    ) -> Result<Event, AppError> {
        match response {
            RsvpResponse::Join => self.rsvp_join(actor, event_id).await,
            RsvpResponse::Decline => self.rsvp_decline(actor, event_id).await,
            RsvpResponse::Leave => self.rsvp_leave(actor, event_id).await,
        }
    }

    pub async fn rsvp_join(&self, actor: &Identity, event_id: &str) -> Result<Event, AppError> {
        self.answer(
            event_id,
            &[
                FieldOp::add_to_set("attendees", actor.id.as_str()),
                FieldOp::remove_from_set("declined", actor.id.as_str()),
            ],
        )
        .await
    }

    pub async fn rsvp_decline(&self, actor: &Identity, event_id: &str) -> Result<Event, AppError> {
        self.answer(
            event_id,
            &[
                FieldOp::remove_from_set("attendees", actor.id.as_str()),
                FieldOp::add_to_set("declined", actor.id.as_str()),
            ],
        )
        .await
    }

    pub async fn rsvp_leave(&self, actor: &Identity, event_id: &str) -> Result<Event, AppError> {
        self.answer(
            event_id,
            &[
                FieldOp::remove_from_set("attendees", actor.id.as_str()),
                FieldOp::remove_from_set("declined", actor.id.as_str()),
            ],
        )
        .await
    }

    // ==================== ROSTER ====================

    pub async fn create_service(
        &self,
        actor: &Identity,
        request: CreateServiceRequest,
    ) -> Result<Service, AppError> {
        require(rules::can_manage_roster(actor), "Only admins can create services")?;

        let roles = match request.roles {
            Some(roles) => {
                let roles: Vec<String> = roles
                    .iter()
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect();
                if roles.is_empty() {
                    return Err(AppError::Validation(
                        "A service needs at least one role".to_string(),
                    ));
                }
                roles
            }
            None => DEFAULT_ROLES.iter().map(|r| r.to_string()).collect(),
        };

        let service_type = request
            .service_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_TYPE.to_string());

        let service = Service {
            id: uuid::Uuid::new_v4().to_string(),
            date: request.date,
            service_type,
            roles: roles.into_iter().map(|r| (r, None)).collect(),
        };

        self.store
            .create(Collection::Services, &service.id, body(&service)?)
            .await
            .map_err(AppError::write)?;

        tracing::info!(service_id = %service.id, date = %service.date, "Service created");
        Ok(service)
    }

    /// Return the earliest service in the week of `date`, seeding a default one if the week has none.
    pub async fn ensure_week_service(&self, date: NaiveDate) -> Result<Service, AppError> {
        let sunday = week_start(date);
        let existing = self.store.query(&week_services_query(sunday)).await?;
        if let Some(doc) = existing.documents.first() {
            return Ok(doc.decode()?);
        }

        let id = week_service_id(sunday);

        let service = Service {
            id: id.clone(),
            date: sunday,
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            roles: DEFAULT_ROLES.iter().map(|r| (r.to_string(), None)).collect(),
        };

        match self
            .store
            .create(Collection::Services, &id, body(&service)?)
            .await
        {
            Ok(_) => {
                tracing::info!(service_id = %id, "Week service seeded");
                Ok(service)
            }
            // Another request seeded it first
            Err(StoreError::Duplicate { .. }) => self.load(Collection::Services, &id).await,
            Err(e) => Err(AppError::write(e)),
        }
    }

    /// Claim an open role slot for the acting user. The first claim wins.
    pub async fn volunteer(
        &self,
        actor: &Identity,
        service_id: &str,
        role: &str,
    ) -> Result<Service, AppError> {
        let service: Service = self.load(Collection::Services, service_id).await?;
        if !service.has_role(role) {
            return Err(AppError::NotFound(format!(
                "Role {} not found on service {}",
                role, service_id
            )));
        }
        match service.occupant(role) {
            Some(occupant) if occupant == actor.id => return Ok(service),
            Some(_) => return Err(role_taken(role)),
            None => {}
        }

        let profile: UserProfile = self.load(Collection::Users, &actor.id).await?;
        let restrictions = self.role_restrictions().await?;
        require(
            rules::can_volunteer(actor, role, &profile, &restrictions),
            &format!("{} is restricted to members of another team", role),
        )?;

        let doc = self
            .store
            .update(
                Collection::Services,
                service_id,
                &[FieldOp::SetIfAbsent {
                    path: role_path(role),
                    value: json!(actor.id),
                }],
            )
            .await
            .map_err(|e| match e {
                StoreError::Occupied { .. } => role_taken(role),
                other => AppError::write(other),
            })?;

        tracing::info!(service_id, role, user_id = %actor.id, "Volunteered");
        Ok(doc.decode()?)
    }

    /// Clear a filled slot. Non-admins may only clear their own.
    pub async fn cancel_role(
        &self,
        actor: &Identity,
        service_id: &str,
        role: &str,
    ) -> Result<Service, AppError> {
        let service: Service = self.load(Collection::Services, service_id).await?;
        if !service.has_role(role) {
            return Err(AppError::NotFound(format!(
                "Role {} not found on service {}",
                role, service_id
            )));
        }
        require(
            rules::can_cancel_role(actor, &service, role),
            "Only the volunteer or an admin can cancel this role",
        )?;

        let op = if actor.is_admin {
            FieldOp::Set {
                path: role_path(role),
                value: Value::Null,
            }
        } else {
            FieldOp::CompareAndSet {
                path: role_path(role),
                expected: json!(actor.id),
                value: Value::Null,
            }
        };

        let doc = self
            .store
            .update(Collection::Services, service_id, &[op])
            .await
            .map_err(|e| match e {
                StoreError::Occupied { .. } => {
                    AppError::Conflict(format!("{} is no longer assigned to you", role))
                }
                other => AppError::write(other),
            })?;

        tracing::info!(service_id, role, actor = %actor.id, "Role cancelled");
        Ok(doc.decode()?)
    }

    pub async fn set_role_restriction(
        &self,
        actor: &Identity,
        role: &str,
        team_id: &str,
    ) -> Result<RoleRestriction, AppError> {
        require(
            rules::can_manage_roster(actor),
            "Only admins can restrict roles",
        )?;
        let role = role.trim();
        if role.is_empty() {
            return Err(AppError::Validation("Role name is required".to_string()));
        }
        self.load::<Team>(Collection::Teams, team_id).await?;

        let restriction = RoleRestriction {
            id: role.to_string(),
            role: role.to_string(),
            team_id: team_id.to_string(),
        };
        self.store
            .set(Collection::RoleRestrictions, role, body(&restriction)?)
            .await
            .map_err(AppError::write)?;

        tracing::info!(role, team_id, "Role restricted");
        Ok(restriction)
    }

    pub async fn clear_role_restriction(&self, actor: &Identity, role: &str) -> Result<(), AppError> {
        require(
            rules::can_manage_roster(actor),
            "Only admins can restrict roles",
        )?;

        self.store
            .delete(Collection::RoleRestrictions, role)
            .await
            .map_err(AppError::write)?;

        tracing::info!(role, "Role restriction cleared");
        Ok(())
    }

    // ==================== CHAT ====================

    pub async fn send_message(
        &self,
        actor: &Identity,
        team_id: &str,
        text: &str,
    ) -> Result<Message, AppError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("Message text is required".to_string()));
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(AppError::Validation(format!(
                "Messages are limited to {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        self.load::<Team>(Collection::Teams, team_id).await?;
        let profile: UserProfile = self.load(Collection::Users, &actor.id).await?;
        require(
            rules::can_post_in_channel(actor, team_id, &profile),
            "Only team members can post in this channel",
        )?;

        let sender = if actor.display_name.trim().is_empty() {
            actor.email.clone()
        } else {
            actor.display_name.clone()
        };
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.to_string(),
            sender,
            sender_id: actor.id.clone(),
            team_id: team_id.to_string(),
            timestamp: Utc::now(),
        };

        self.store
            .create(Collection::Messages, &message.id, body(&message)?)
            .await
            .map_err(AppError::write)?;

        tracing::debug!(message_id = %message.id, team_id, "Message sent");
        Ok(message)
    }

    // ==================== HELPERS ====================

    pub async fn role_restrictions(&self) -> Result<RoleRestrictions, AppError> {
        let result = self
            .store
            .query(&Query::collection(Collection::RoleRestrictions))
            .await?;
        result
            .documents
            .iter()
            .map(|doc| doc.decode::<RoleRestriction>().map_err(AppError::from))
            .collect()
    }

    async fn load<T: DeserializeOwned>(&self, collection: Collection, id: &str) -> Result<T, AppError> {
        let doc = self.store.get(collection, id).await?.ok_or_else(|| {
            AppError::NotFound(format!("{} {} not found", collection.singular(), id))
        })?;
        Ok(doc.decode()?)
    }

    async fn answer(&self, event_id: &str, ops: &[FieldOp]) -> Result<Event, AppError> {
        let doc = self
            .store
            .update(Collection::Events, event_id, ops)
            .await
            .map_err(AppError::write)?;
        tracing::debug!(event_id, "RSVP recorded");
        Ok(doc.decode()?)
    }

    async fn ensure_team_name_free(&self, name: &str, except: Option<&str>) -> Result<(), AppError> {
        let teams = self.store.query(&Query::collection(Collection::Teams)).await?;
        let wanted = name.to_lowercase();
        let taken = teams.documents.iter().any(|doc| {
            Some(doc.id.as_str()) != except
                && Collection::Teams.unique_key(&doc.data).as_deref() == Some(wanted.as_str())
        });
        if taken {
            return Err(AppError::Conflict(format!("Team '{}' already exists", name)));
        }
        Ok(())
    }

    async fn delete_matching(&self, query: Query) -> Result<usize, AppError> {
        let ids: Vec<String> = self
            .store
            .query(&query)
            .await?
            .documents
            .into_iter()
            .map(|doc| doc.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        self.store
            .batch_delete(query.collection, &ids)
            .await
            .map_err(AppError::write)
    }
}

fn role_path(role: &str) -> FieldPath {
    FieldPath::new("roles").key(role)
}

fn role_taken(role: &str) -> AppError {
    AppError::Conflict(format!("{} is already filled", role))
}

fn validate_team_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Team name is required".to_string()));
    }
    Ok(name.to_string())
}

fn team_name_error(err: StoreError, name: &str) -> AppError {
    match err {
        StoreError::Duplicate { .. } => {
            AppError::Conflict(format!("Team '{}' already exists", name))
        }
        other => AppError::write(other),
    }
}

fn body<T: Serialize>(model: &T) -> Result<Value, AppError> {
    to_body(model).map_err(|e| AppError::Internal(format!("Failed to encode document: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coordinates, Location};
    use crate::store::{init_database, SqliteDocumentStore};
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Fixture {
        gateway: MutationGateway,
        store: Arc<SqliteDocumentStore>,
        admin: Identity,
        _dir: TempDir,
    }

    fn identity(id: &str, is_admin: bool) -> Identity {
        Identity {
            id: id.to_string(),
            email: format!("{}@example.org", id),
            display_name: id.to_string(),
            is_admin,
        }
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("gateway.sqlite")).await.unwrap();
        let store = Arc::new(SqliteDocumentStore::new(pool));
        let gateway = MutationGateway::new(store.clone());
        let fixture = Fixture {
            gateway,
            store,
            admin: identity("admin", true),
            _dir: dir,
        };
        fixture.add_profile("admin", Role::Admin).await;
        fixture
    }

    impl Fixture {
        async fn add_profile(&self, id: &str, role: Role) -> Identity {
            let profile = UserProfile::new(id, &format!("{}@example.org", id), id, role);
            self.store
                .create(Collection::Users, id, body(&profile).unwrap())
                .await
                .unwrap();
            identity(id, role == Role::Admin)
        }

        async fn profile(&self, id: &str) -> UserProfile {
            self.gateway.load(Collection::Users, id).await.unwrap()
        }

        async fn event(&self) -> Event {
            self.gateway
                .create_event(
                    &self.admin,
                    CreateEventRequest {
                        title: "Picnic".to_string(),
                        date: Utc.with_ymd_and_hms(2099, 6, 1, 12, 0, 0).unwrap(),
                        description: String::new(),
                        expiry_date: None,
                        locations: vec![],
                    },
                )
                .await
                .unwrap()
        }
    }

    #[test]
    fn test_week_start_is_sunday() {
        let wednesday = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();
        let sunday = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        assert_eq!(week_start(wednesday), sunday);
        assert_eq!(week_start(sunday), sunday);
        assert_eq!(week_service_id(sunday), "service-2025-01-05");
    }

    #[tokio::test]
    async fn test_member_cannot_touch_admin_operations() {
        let f = fixture().await;
        let member = f.add_profile("m1", Role::Member).await;

        assert!(matches!(
            f.gateway.create_team(&member, "Security").await,
            Err(AppError::AuthorizationDenied(_))
        ));
        assert!(matches!(
            f.gateway.add_team_member(&member, "m1", "any").await,
            Err(AppError::AuthorizationDenied(_))
        ));
        assert!(matches!(
            f.gateway.delete_user(&member, "admin").await,
            Err(AppError::AuthorizationDenied(_))
        ));
        assert!(matches!(
            f.gateway.set_role_restriction(&member, "Sound", "any").await,
            Err(AppError::AuthorizationDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_team_name_rejected_case_insensitively() {
        let f = fixture().await;
        f.gateway.create_team(&f.admin, "Security").await.unwrap();
        assert!(matches!(
            f.gateway.create_team(&f.admin, " security ").await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            f.gateway.create_team(&f.admin, "   ").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_simultaneous_team_creation_yields_one_team() {
        let f = fixture().await;
        let gateway = Arc::new(f.gateway.clone());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let gateway = gateway.clone();
            let admin = f.admin.clone();
            handles.push(tokio::spawn(async move {
                gateway.create_team(&admin, "Greeting").await
            }));
        }

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(AppError::Conflict(_)) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(created, 1);

        let teams = f.store.query(&Query::collection(Collection::Teams)).await.unwrap();
        assert_eq!(teams.documents.len(), 1);
    }

    #[tokio::test]
    async fn test_rename_keeps_memberships() {
        let f = fixture().await;
        let member = f.add_profile("m1", Role::Member).await;
        let team = f.gateway.create_team(&f.admin, "Media").await.unwrap();
        f.gateway
            .add_team_member(&f.admin, &member.id, &team.id)
            .await
            .unwrap();

        let renamed = f
            .gateway
            .rename_team(&f.admin, &team.id, "Media & Tech")
            .await
            .unwrap();
        assert_eq!(renamed.name, "Media & Tech");
        assert!(f.profile("m1").await.is_member_of(&team.id));
    }

    #[tokio::test]
    async fn test_membership_changes_are_idempotent() {
        let f = fixture().await;
        f.add_profile("m1", Role::Member).await;
        let team = f.gateway.create_team(&f.admin, "Worship").await.unwrap();

        f.gateway.add_team_member(&f.admin, "m1", &team.id).await.unwrap();
        let profile = f.gateway.add_team_member(&f.admin, "m1", &team.id).await.unwrap();
        assert_eq!(profile.teams, vec![team.id.clone()]);

        let profile = f
            .gateway
            .remove_team_member(&f.admin, "m1", &team.id)
            .await
            .unwrap();
        assert!(profile.teams.is_empty());
    }

    #[tokio::test]
    async fn test_adding_member_to_missing_team_is_not_found() {
        let f = fixture().await;
        f.add_profile("m1", Role::Member).await;
        assert!(matches!(
            f.gateway.add_team_member(&f.admin, "m1", "nope").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_team_cleans_references() {
        let f = fixture().await;
        let member = f.add_profile("m1", Role::Member).await;
        let team = f.gateway.create_team(&f.admin, "Security").await.unwrap();
        let other = f.gateway.create_team(&f.admin, "Media").await.unwrap();

        f.gateway.add_team_member(&f.admin, "m1", &team.id).await.unwrap();
        f.gateway.add_team_member(&f.admin, "m1", &other.id).await.unwrap();
        f.gateway
            .set_role_restriction(&f.admin, "Sound", &team.id)
            .await
            .unwrap();
        f.gateway.send_message(&member, &team.id, "hello").await.unwrap();

        let cleanup = f.gateway.delete_team(&f.admin, &team.id).await.unwrap();
        assert_eq!(
            cleanup,
            TeamCleanup {
                members: 1,
                restrictions: 1,
                messages: 1
            }
        );
        assert_eq!(f.profile("m1").await.teams, vec![other.id]);
        assert!(f.gateway.role_restrictions().await.unwrap().required_team("Sound").is_none());
    }

    #[tokio::test]
    async fn test_delete_team_removes_team_after_references() {
        let f = fixture().await;
        f.add_profile("m1", Role::Member).await;
        let team = f.gateway.create_team(&f.admin, "Security").await.unwrap();
        f.gateway.add_team_member(&f.admin, "m1", &team.id).await.unwrap();
        f.gateway
            .set_role_restriction(&f.admin, "Sound", &team.id)
            .await
            .unwrap();

        let mut changes = f.store.changes();
        f.gateway.delete_team(&f.admin, &team.id).await.unwrap();

        let mut order = Vec::new();
        while let Ok(change) = changes.try_recv() {
            order.push(change.collection);
        }
        assert_eq!(order.last(), Some(&Collection::Teams));
        assert_eq!(order.iter().filter(|c| **c == Collection::Teams).count(), 1);
    }

    #[tokio::test]
    async fn test_delete_team_finishes_partial_cleanup() {
        let f = fixture().await;
        f.add_profile("m1", Role::Member).await;
        f.add_profile("m2", Role::Member).await;
        let team = f.gateway.create_team(&f.admin, "Greeters").await.unwrap();
        f.gateway.add_team_member(&f.admin, "m1", &team.id).await.unwrap();
        f.gateway.add_team_member(&f.admin, "m2", &team.id).await.unwrap();

        // An earlier attempt already released m1
        f.gateway.remove_team_member(&f.admin, "m1", &team.id).await.unwrap();

        let cleanup = f.gateway.delete_team(&f.admin, &team.id).await.unwrap();
        assert_eq!(cleanup.members, 1);
        assert!(f.profile("m1").await.teams.is_empty());
        assert!(f.profile("m2").await.teams.is_empty());
        assert!(f.store.get(Collection::Teams, &team.id).await.unwrap().is_none());

        assert!(matches!(
            f.gateway.delete_team(&f.admin, &team.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_user_protects_admins() {
        let f = fixture().await;
        f.add_profile("m1", Role::Member).await;

        assert!(matches!(
            f.gateway.delete_user(&f.admin, "admin").await,
            Err(AppError::Validation(_))
        ));
        f.gateway.delete_user(&f.admin, "m1").await.unwrap();
        assert!(f.store.get(Collection::Users, "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_event_defaults_and_validation() {
        let f = fixture().await;
        let event = f.event().await;
        assert_eq!(event.expiry_date - event.date, Duration::days(1));
        assert_eq!(event.created_by, "admin");

        let bad = CreateEventRequest {
            title: "Hike".to_string(),
            date: Utc::now(),
            description: String::new(),
            expiry_date: None,
            locations: vec![Location {
                name: "Nowhere".to_string(),
                coordinates: Coordinates { lat: 120.0, lng: 0.0 },
            }],
        };
        assert!(matches!(
            f.gateway.create_event(&f.admin, bad).await,
            Err(AppError::Validation(_))
        ));

        let untitled = CreateEventRequest {
            title: " ".to_string(),
            date: Utc::now(),
            description: String::new(),
            expiry_date: None,
            locations: vec![],
        };
        assert!(matches!(
            f.gateway.create_event(&f.admin, untitled).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_rsvp_lifecycle() {
        let f = fixture().await;
        let member = f.add_profile("m1", Role::Member).await;
        let event = f.event().await;

        f.gateway.rsvp_join(&member, &event.id).await.unwrap();
        let joined = f.gateway.rsvp_join(&member, &event.id).await.unwrap();
        assert_eq!(joined.attendees, vec!["m1".to_string()]);

        let declined = f.gateway.rsvp_decline(&member, &event.id).await.unwrap();
        assert!(declined.attendees.is_empty());
        assert_eq!(declined.declined, vec!["m1".to_string()]);

        let left = f
            .gateway
            .rsvp(&member, &event.id, RsvpResponse::Leave)
            .await
            .unwrap();
        assert_eq!(left.response_of("m1"), None);
    }

    #[tokio::test]
    async fn test_concurrent_rsvps_are_all_kept() {
        let f = fixture().await;
        let event = f.event().await;
        let gateway = Arc::new(f.gateway.clone());

        let mut handles = Vec::new();
        for i in 0..8 {
            let gateway = gateway.clone();
            let event_id = event.id.clone();
            handles.push(tokio::spawn(async move {
                let user = identity(&format!("u{}", i), false);
                gateway.rsvp_join(&user, &event_id).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let event: Event = f.gateway.load(Collection::Events, &event.id).await.unwrap();
        assert_eq!(event.attendees.len(), 8);
    }

    #[tokio::test]
    async fn test_ensure_week_service_is_idempotent() {
        let f = fixture().await;
        let thursday = NaiveDate::from_ymd_opt(2025, 3, 13).unwrap();

        let first = f.gateway.ensure_week_service(thursday).await.unwrap();
        let again = f
            .gateway
            .ensure_week_service(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
            .await
            .unwrap();
        assert_eq!(first.id, "service-2025-03-09");
        assert_eq!(first, again);
        assert_eq!(first.roles.len(), DEFAULT_ROLES.len());
        assert!(first.roles.values().all(Option::is_none));
    }

    #[tokio::test]
    async fn test_ensure_week_service_reuses_existing_service() {
        let f = fixture().await;
        let wednesday = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();
        let service = |day| CreateServiceRequest {
            date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            service_type: None,
            roles: None,
        };

        let midweek = f.gateway.create_service(&f.admin, service(8)).await.unwrap();
        let sunday = f.gateway.create_service(&f.admin, service(5)).await.unwrap();

        let found = f.gateway.ensure_week_service(wednesday).await.unwrap();
        assert_eq!(found.id, sunday.id);
        assert_ne!(found.id, midweek.id);

        let week = f
            .store
            .query(&week_services_query(week_start(wednesday)))
            .await
            .unwrap();
        assert_eq!(week.documents.len(), 2);
    }

    #[tokio::test]
    async fn test_ensure_week_service_seeds_only_empty_weeks() {
        let f = fixture().await;
        let created = f
            .gateway
            .create_service(
                &f.admin,
                CreateServiceRequest {
                    date: NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
                    service_type: None,
                    roles: None,
                },
            )
            .await
            .unwrap();

        let found = f
            .gateway
            .ensure_week_service(NaiveDate::from_ymd_opt(2025, 1, 8).unwrap())
            .await
            .unwrap();
        assert_eq!(found.id, created.id);

        let week = f
            .store
            .query(&week_services_query(NaiveDate::from_ymd_opt(2025, 1, 5).unwrap()))
            .await
            .unwrap();
        assert_eq!(week.documents.len(), 1);

        // The following week is still empty and gets the default service
        let next = f
            .gateway
            .ensure_week_service(NaiveDate::from_ymd_opt(2025, 1, 12).unwrap())
            .await
            .unwrap();
        assert_eq!(next.id, "service-2025-01-12");
    }

    #[tokio::test]
    async fn test_volunteer_first_wins() {
        let f = fixture().await;
        let a = f.add_profile("a", Role::Member).await;
        let b = f.add_profile("b", Role::Member).await;
        let service = f
            .gateway
            .ensure_week_service(NaiveDate::from_ymd_opt(2025, 1, 5).unwrap())
            .await
            .unwrap();

        let filled = f.gateway.volunteer(&a, &service.id, "Keys").await.unwrap();
        assert_eq!(filled.occupant("Keys"), Some("a"));

        assert!(matches!(
            f.gateway.volunteer(&b, &service.id, "Keys").await,
            Err(AppError::Conflict(_))
        ));
        // Volunteering again for one's own slot is a no-op
        f.gateway.volunteer(&a, &service.id, "Keys").await.unwrap();

        // Different roles never conflict
        let both = f.gateway.volunteer(&b, &service.id, "Drums").await.unwrap();
        assert_eq!(both.occupant("Keys"), Some("a"));
        assert_eq!(both.occupant("Drums"), Some("b"));
    }

    #[tokio::test]
    async fn test_restricted_role_needs_membership() {
        let f = fixture().await;
        let member = f.add_profile("m1", Role::Member).await;
        let security = f.gateway.create_team(&f.admin, "Security").await.unwrap();
        f.gateway
            .set_role_restriction(&f.admin, "Sound", &security.id)
            .await
            .unwrap();
        let service = f
            .gateway
            .ensure_week_service(NaiveDate::from_ymd_opt(2025, 1, 5).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            f.gateway.volunteer(&member, &service.id, "Sound").await,
            Err(AppError::AuthorizationDenied(_))
        ));

        f.gateway
            .add_team_member(&f.admin, "m1", &security.id)
            .await
            .unwrap();
        let filled = f.gateway.volunteer(&member, &service.id, "Sound").await.unwrap();
        assert_eq!(filled.occupant("Sound"), Some("m1"));
    }

    #[tokio::test]
    async fn test_cancel_role_rules() {
        let f = fixture().await;
        let a = f.add_profile("a", Role::Member).await;
        let b = f.add_profile("b", Role::Member).await;
        let service = f
            .gateway
            .ensure_week_service(NaiveDate::from_ymd_opt(2025, 1, 5).unwrap())
            .await
            .unwrap();
        f.gateway.volunteer(&a, &service.id, "Keys").await.unwrap();

        assert!(matches!(
            f.gateway.cancel_role(&b, &service.id, "Keys").await,
            Err(AppError::AuthorizationDenied(_))
        ));

        let cleared = f.gateway.cancel_role(&a, &service.id, "Keys").await.unwrap();
        assert_eq!(cleared.occupant("Keys"), None);
        assert!(cleared.has_role("Keys"));

        f.gateway.volunteer(&b, &service.id, "Keys").await.unwrap();
        let cleared = f
            .gateway
            .cancel_role(&f.admin, &service.id, "Keys")
            .await
            .unwrap();
        assert_eq!(cleared.occupant("Keys"), None);
    }

    #[tokio::test]
    async fn test_unknown_role_is_not_found() {
        let f = fixture().await;
        let a = f.add_profile("a", Role::Member).await;
        let service = f
            .gateway
            .ensure_week_service(NaiveDate::from_ymd_opt(2025, 1, 5).unwrap())
            .await
            .unwrap();
        assert!(matches!(
            f.gateway.volunteer(&a, &service.id, "Bagpipes").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_send_message_rules() {
        let f = fixture().await;
        let member = f.add_profile("m1", Role::Member).await;
        let team = f.gateway.create_team(&f.admin, "Media").await.unwrap();

        assert!(matches!(
            f.gateway.send_message(&member, &team.id, "hi").await,
            Err(AppError::AuthorizationDenied(_))
        ));

        f.gateway.add_team_member(&f.admin, "m1", &team.id).await.unwrap();
        assert!(matches!(
            f.gateway.send_message(&member, &team.id, "   ").await,
            Err(AppError::Validation(_))
        ));

        let message = f.gateway.send_message(&member, &team.id, " hi ").await.unwrap();
        assert_eq!(message.text, "hi");
        assert_eq!(message.sender, "m1");
        assert_eq!(message.team_id, team.id);
        let age = Utc::now() - message.timestamp;
        assert!(age < Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_create_service_with_custom_roles() {
        let f = fixture().await;
        let service = f
            .gateway
            .create_service(
                &f.admin,
                CreateServiceRequest {
                    date: NaiveDate::from_ymd_opt(2025, 12, 24).unwrap(),
                    service_type: Some("Christmas Eve".to_string()),
                    roles: Some(vec!["Choir".to_string(), " ".to_string()]),
                },
            )
            .await
            .unwrap();
        assert_eq!(service.service_type, "Christmas Eve");
        assert_eq!(service.roles.keys().collect::<Vec<_>>(), vec!["Choir"]);
    }
}
