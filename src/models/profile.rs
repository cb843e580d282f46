//! Identity and user profile models.

use serde::{Deserialize, Serialize};

/// Stored role of a profile. Only the admin bootstrap step assigns `Admin`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    Admin,
}

/// The signed-in user as seen by the rest of the application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub is_admin: bool,
}

/// Per-user document in the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
    /// Team ids, no duplicates
    #[serde(default)]
    pub teams: Vec<String>,
}

impl UserProfile {
    pub fn new(id: &str, email: &str, display_name: &str, role: Role) -> Self {
        Self {
            id: id.to_string(),
            email: email.to_string(),
            display_name: display_name.to_string(),
            role,
            teams: Vec::new(),
        }
    }

    pub fn is_member_of(&self, team_id: &str) -> bool {
        self.teams.iter().any(|t| t == team_id)
    }
}
