//! Server state shared by the handlers.

use std::sync::Arc;

use serde::Deserialize;

use crate::{
    domain::IdentityKind,
    infrastructure::registry::ConnectionRegistry,
    ui::dispatcher::EventDispatcher,
    usecase::PresenceSynchronizer,
};

/// Optional authentication supplied as query parameters at upgrade time.
///
/// When any field is missing the client must send `authenticate` as its first event.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    pub identity_id: Option<String>,
    pub room_code: Option<String>,
    pub kind: Option<IdentityKind>,
}

impl ConnectQuery {
    /// All three handshake fields, when present
    pub fn handshake(&self) -> Option<(&str, &str, IdentityKind)> {
        match (&self.identity_id, &self.room_code, self.kind) {
            (Some(identity_id), Some(room_code), Some(kind)) => {
                Some((identity_id.as_str(), room_code.as_str(), kind))
            }
            _ => None,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceSynchronizer>,
    pub dispatcher: Arc<EventDispatcher>,
}
