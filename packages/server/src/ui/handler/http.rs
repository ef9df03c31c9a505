//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{Json, extract::State};
use partyline_shared::time::timestamp_to_jst_rfc3339;

use crate::{
    infrastructure::dto::http::{ConnectionSummaryDto, ConnectionsDto},
    ui::state::AppState,
};

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Live connections, oldest first
pub async fn list_connections(State(state): State<Arc<AppState>>) -> Json<ConnectionsDto> {
    let connections: Vec<ConnectionSummaryDto> = state
        .registry
        .snapshot()
        .await
        .into_iter()
        .map(|snapshot| ConnectionSummaryDto {
            connection_id: snapshot.connection_id.as_str().to_string(),
            identity_id: snapshot
                .identity
                .as_ref()
                .map(|identity| identity.id.as_str().to_string()),
            kind: snapshot.identity.as_ref().map(|identity| identity.kind),
            channels: snapshot.channels.iter().map(|c| c.to_string()).collect(),
            connected_at: timestamp_to_jst_rfc3339(snapshot.connected_at.value()),
        })
        .collect();

    Json(ConnectionsDto {
        count: connections.len(),
        connections,
    })
}
