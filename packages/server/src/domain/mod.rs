//! Domain layer for the presence relay.
//!
//! This module contains business logic that is independent of
//! data transfer objects (DTOs) and infrastructure concerns.

pub mod entity;
pub mod error;
pub mod factory;
pub mod repository;
pub mod value_object;

pub use entity::{Attributes, Identity, IdentityKind, Room, Team};
pub use error::{StoreError, ValueObjectError};
pub use factory::ConnectionIdFactory;
pub use repository::{IdentityUpdate, PresenceStore, TeamUpdate};
pub use value_object::{ConnectionId, IdentityId, RoomCode, TeamName, Timestamp};

#[cfg(test)]
pub use repository::MockPresenceStore;
