//! Team model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A ministry team. Referenced everywhere by `id`; `name` is display only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Request body for creating a team.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTeamRequest {
    pub name: String,
}

/// Request body for renaming a team.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameTeamRequest {
    pub name: String,
}
