//! Weekly service roster models.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Roles seeded into a service created automatically for an empty week.
pub const DEFAULT_ROLES: [&str; 5] = [
    "Worship Leader",
    "Keys",
    "Drums",
    "Media/ProPresenter",
    "Sound",
];

pub const DEFAULT_SERVICE_TYPE: &str = "Sunday Service";

/// A service with its volunteer slots. `None` marks an open slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub date: NaiveDate,
    pub service_type: String,
    #[serde(default)]
    pub roles: BTreeMap<String, Option<String>>,
}

impl Service {
    pub fn occupant(&self, role: &str) -> Option<&str> {
        self.roles.get(role).and_then(|slot| slot.as_deref())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }
}

/// A role that only members of one team may fill. Document id is the role name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoleRestriction {
    pub id: String,
    pub role: String,
    pub team_id: String,
}

/// Request body for creating a service.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceRequest {
    pub date: NaiveDate,
    #[serde(default)]
    pub service_type: Option<String>,
    /// Defaults to [`DEFAULT_ROLES`]
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

/// Request body for restricting a role to a team.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRestrictionRequest {
    pub team_id: String,
}
