//! Infrastructure layer.
//!
//! Wire DTOs, the live connection registry and store implementations.

pub mod dto;
pub mod registry;
pub mod repository;
