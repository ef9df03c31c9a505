//! HTTP API response DTOs for the presence relay.

use serde::{Deserialize, Serialize};

use crate::domain::IdentityKind;

/// Live connection summary for the debug endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSummaryDto {
    pub connection_id: String,
    pub identity_id: Option<String>,
    pub kind: Option<IdentityKind>,
    pub channels: Vec<String>,
    pub connected_at: String, // ISO 8601
}

/// Response of the connections endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionsDto {
    pub count: usize,
    pub connections: Vec<ConnectionSummaryDto>,
}
