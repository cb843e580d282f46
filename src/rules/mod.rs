//! Authorization rules.
//!
//! Pure predicates over the current identity and the documents it acts on.
//! Every mutation evaluates one of these before it reaches the store.

use std::collections::HashMap;

use crate::errors::AppError;
use crate::models::{Identity, RoleRestriction, Service, UserProfile};

/// Role name to the team id required to fill it.
#[derive(Debug, Clone, Default)]
pub struct RoleRestrictions(HashMap<String, String>);

impl RoleRestrictions {
    pub fn required_team(&self, role: &str) -> Option<&str> {
        self.0.get(role).map(String::as_str)
    }
}

impl FromIterator<RoleRestriction> for RoleRestrictions {
    fn from_iter<I: IntoIterator<Item = RoleRestriction>>(iter: I) -> Self {
        Self(iter.into_iter().map(|r| (r.role, r.team_id)).collect())
    }
}

pub fn can_manage_users(identity: &Identity) -> bool {
    identity.is_admin
}

pub fn can_manage_teams(identity: &Identity) -> bool {
    identity.is_admin
}

pub fn can_create_event(identity: &Identity) -> bool {
    identity.is_admin
}

pub fn can_delete_event(identity: &Identity) -> bool {
    identity.is_admin
}

/// Creating services and editing role restrictions.
pub fn can_manage_roster(identity: &Identity) -> bool {
    identity.is_admin
}

/// Open roles are free for anyone; restricted roles need membership of the team.
pub fn can_volunteer(
    identity: &Identity,
    role: &str,
    profile: &UserProfile,
    restrictions: &RoleRestrictions,
) -> bool {
    if profile.id != identity.id {
        return false;
    }
    match restrictions.required_team(role) {
        None => true,
        Some(team_id) => profile.is_member_of(team_id),
    }
}

pub fn can_view_channel(identity: &Identity, team_id: &str, profile: &UserProfile) -> bool {
    profile.id == identity.id && profile.is_member_of(team_id)
}

pub fn can_post_in_channel(identity: &Identity, team_id: &str, profile: &UserProfile) -> bool {
    can_view_channel(identity, team_id, profile)
}

/// A filled slot may be cleared by its occupant or an admin.
pub fn can_cancel_role(identity: &Identity, service: &Service, role: &str) -> bool {
    identity.is_admin || service.occupant(role) == Some(identity.id.as_str())
}

/// Turn a failed predicate into a user-visible rejection.
pub fn require(allowed: bool, message: &str) -> Result<(), AppError> {
    if allowed {
        Ok(())
    } else {
        Err(AppError::AuthorizationDenied(message.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn identity(id: &str, is_admin: bool) -> Identity {
        Identity {
            id: id.to_string(),
            email: format!("{}@example.com", id),
            display_name: id.to_string(),
            is_admin,
        }
    }

    fn profile(id: &str, teams: &[&str]) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            email: format!("{}@example.com", id),
            display_name: id.to_string(),
            role: Role::Member,
            teams: teams.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn restrictions(pairs: &[(&str, &str)]) -> RoleRestrictions {
        pairs
            .iter()
            .map(|(role, team)| RoleRestriction {
                id: role.to_string(),
                role: role.to_string(),
                team_id: team.to_string(),
            })
            .collect()
    }

    fn service(roles: &[(&str, Option<&str>)]) -> Service {
        Service {
            id: "s1".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
            service_type: "Sunday Service".to_string(),
            roles: roles
                .iter()
                .map(|(r, o)| (r.to_string(), o.map(str::to_string)))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_admin_only_predicates() {
        let admin = identity("a", true);
        let member = identity("m", false);
        let checks: [fn(&Identity) -> bool; 5] = [
            can_manage_users,
            can_manage_teams,
            can_create_event,
            can_delete_event,
            can_manage_roster,
        ];
        for check in checks {
            assert!(check(&admin));
            assert!(!check(&member));
        }
    }

    #[test]
    fn test_unrestricted_role_is_open_to_everyone() {
        let me = identity("u1", false);
        assert!(can_volunteer(&me, "Keys", &profile("u1", &[]), &restrictions(&[])));
    }

    #[test]
    fn test_restricted_role_requires_team_membership() {
        let me = identity("u1", false);
        let rules = restrictions(&[("Sound", "security")]);

        assert!(!can_volunteer(&me, "Sound", &profile("u1", &[]), &rules));
        assert!(!can_volunteer(&me, "Sound", &profile("u1", &["media"]), &rules));
        assert!(can_volunteer(&me, "Sound", &profile("u1", &["media", "security"]), &rules));
        // Restrictions are per role
        assert!(can_volunteer(&me, "Keys", &profile("u1", &[]), &rules));
    }

    #[test]
    fn test_volunteering_needs_own_profile() {
        let me = identity("u1", false);
        assert!(!can_volunteer(&me, "Keys", &profile("u2", &[]), &restrictions(&[])));
    }

    #[test]
    fn test_channel_visibility_follows_membership() {
        let me = identity("u1", false);
        assert!(can_view_channel(&me, "t1", &profile("u1", &["t1"])));
        assert!(!can_view_channel(&me, "t2", &profile("u1", &["t1"])));
        assert!(!can_post_in_channel(&me, "t2", &profile("u1", &["t1"])));
        // Admin status does not open channels
        assert!(!can_view_channel(&identity("u1", true), "t2", &profile("u1", &[])));
    }

    #[test]
    fn test_cancel_role_occupant_or_admin() {
        let svc = service(&[("Keys", Some("u1")), ("Drums", None)]);
        assert!(can_cancel_role(&identity("u1", false), &svc, "Keys"));
        assert!(!can_cancel_role(&identity("u2", false), &svc, "Keys"));
        assert!(can_cancel_role(&identity("boss", true), &svc, "Keys"));
        assert!(!can_cancel_role(&identity("u1", false), &svc, "Drums"));
    }

    #[test]
    fn test_require_maps_to_authorization_denied() {
        assert!(require(true, "nope").is_ok());
        assert!(matches!(
            require(false, "nope"),
            Err(AppError::AuthorizationDenied(msg)) if msg == "nope"
        ));
    }
}
