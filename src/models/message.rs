//! Team chat message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum accepted message length in characters.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// An immutable chat message in one team channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    /// Display name (or email) of the sender at send time
    pub sender: String,
    pub sender_id: String,
    pub team_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Request body for posting a message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub text: String,
}
