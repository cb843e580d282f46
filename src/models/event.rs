//! Event model for the RSVP board.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Map pin coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A named map pin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub name: String,
    pub coordinates: Coordinates,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    pub expiry_date: DateTime<Utc>,
    /// Ordered, first entry is the primary pin
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub attendees: Vec<String>,
    #[serde(default)]
    pub declined: Vec<String>,
    pub created_by: String,
}

impl Event {
    pub fn response_of(&self, user_id: &str) -> Option<RsvpResponse> {
        if self.attendees.iter().any(|a| a == user_id) {
            Some(RsvpResponse::Join)
        } else if self.declined.iter().any(|d| d == user_id) {
            Some(RsvpResponse::Decline)
        } else {
            None
        }
    }
}

/// Request body for creating an event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub title: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    /// Defaults to one day after `date`
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RsvpResponse {
    Join,
    Decline,
    Leave,
}

/// Request body for answering an event invitation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpRequest {
    pub response: RsvpResponse,
}
