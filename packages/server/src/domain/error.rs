//! Domain layer error definitions.

use std::time::Duration;

use thiserror::Error;

/// Errors related to Value Objects validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueObjectError {
    /// IdentityId validation error
    #[error("IdentityId cannot be empty")]
    IdentityIdEmpty,

    /// IdentityId too long error
    #[error("IdentityId cannot exceed {max} characters (got {actual})")]
    IdentityIdTooLong { max: usize, actual: usize },

    /// RoomCode validation error
    #[error("RoomCode cannot be empty")]
    RoomCodeEmpty,

    /// RoomCode too long error
    #[error("RoomCode cannot exceed {max} characters (got {actual})")]
    RoomCodeTooLong { max: usize, actual: usize },

    /// TeamName validation error
    #[error("TeamName cannot be empty")]
    TeamNameEmpty,

    /// TeamName too long error
    #[error("TeamName cannot exceed {max} characters (got {actual})")]
    TeamNameTooLong { max: usize, actual: usize },

    /// ConnectionId invalid format error (not a valid UUID format)
    #[error("ConnectionId must be a valid UUID format (got: {0})")]
    ConnectionIdInvalidFormat(String),
}

/// Errors reported by the persistent store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or rejected the request transiently
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A single store call exceeded its deadline
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// A record with the same key already exists
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    /// The record to update does not exist
    #[error("record not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_is_transient() {
        // テスト項目: 一時的なエラーのみリトライ対象と判定される
        // then (期待する結果):
        assert!(StoreError::Unavailable("down".to_string()).is_transient());
        assert!(StoreError::Timeout(Duration::from_millis(10)).is_transient());
        assert!(!StoreError::AlreadyExists("Alpha".to_string()).is_transient());
        assert!(!StoreError::NotFound("Alpha".to_string()).is_transient());
    }
}
