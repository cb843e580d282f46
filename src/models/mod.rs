//! Data models for the Fellowship community application.
//!
//! Field names are camelCase on the wire and in stored documents.

mod auth;
mod event;
mod message;
mod profile;
mod service;
mod team;

pub use auth::*;
pub use event::*;
pub use message::*;
pub use profile::*;
pub use service::*;
pub use team::*;

/// Models stored as documents expose their document id.
pub trait Keyed {
    fn key(&self) -> &str;
}

macro_rules! keyed {
    ($($ty:ty),* $(,)?) => {
        $(impl Keyed for $ty {
            fn key(&self) -> &str {
                &self.id
            }
        })*
    };
}

keyed!(UserProfile, Team, Event, Service, RoleRestriction, Message);
