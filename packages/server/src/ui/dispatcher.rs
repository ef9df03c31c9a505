//! Event dispatcher.
//!
//! Single entry point for inbound client events: checks the connection's
//! authentication state, routes the event to presence, team or relay
//! handling, and reports request failures to the requester only.

use std::sync::Arc;

use crate::{
    domain::{ConnectionId, IdentityId, IdentityKind, TeamName, ValueObjectError},
    infrastructure::{
        dto::websocket::{ClientEvent, ErrorCode, ServerEvent},
        registry::{BoundIdentity, ConnectionRegistry, Recipients},
    },
    usecase::{PresenceError, PresenceSynchronizer, SignalingRelay, TeamCoordinator, TeamError},
};

/// What the transport loop should do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Close the transport (failed authentication)
    Terminate,
}

/// A request-level failure sent back as `request-failed`
#[derive(Debug)]
struct Rejection {
    code: ErrorCode,
    message: String,
}

impl From<TeamError> for Rejection {
    fn from(error: TeamError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

impl From<PresenceError> for Rejection {
    fn from(error: PresenceError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

impl From<ValueObjectError> for Rejection {
    fn from(error: ValueObjectError) -> Self {
        Self {
            code: ErrorCode::InvalidRequest,
            message: error.to_string(),
        }
    }
}

fn team_name(value: String) -> Result<TeamName, Rejection> {
    Ok(TeamName::new(value)?)
}

fn identity_ids(values: Vec<String>) -> Result<Vec<IdentityId>, Rejection> {
    values
        .into_iter()
        .map(|value| IdentityId::new(value).map_err(Rejection::from))
        .collect()
}

pub struct EventDispatcher {
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceSynchronizer>,
    teams: Arc<TeamCoordinator>,
    relay: Arc<SignalingRelay>,
}

impl EventDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        presence: Arc<PresenceSynchronizer>,
        teams: Arc<TeamCoordinator>,
        relay: Arc<SignalingRelay>,
    ) -> Self {
        Self {
            registry,
            presence,
            teams,
            relay,
        }
    }

    /// Parse and dispatch one text frame.
    ///
    /// Frames that are not a known event are logged and ignored.
    pub async fn dispatch_text(&self, connection_id: &ConnectionId, text: &str) -> Flow {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.dispatch(connection_id, event).await,
            Err(e) => {
                tracing::warn!(connection = %connection_id, error = %e, "ignored unrecognized event");
                Flow::Continue
            }
        }
    }

    /// Run the authentication handshake.
    ///
    /// On failure the connection receives `connect-error` and must be closed.
    pub async fn authenticate(
        &self,
        connection_id: &ConnectionId,
        identity_id: &str,
        room_code: &str,
        kind: IdentityKind,
    ) -> Flow {
        match self
            .presence
            .connect(connection_id, identity_id, room_code, kind)
            .await
        {
            Ok(_) => {
                let presence = self.presence.clone();
                tokio::spawn(async move {
                    presence.flush_deferred().await;
                });
                Flow::Continue
            }
            Err(e) => {
                tracing::warn!(connection = %connection_id, identity = identity_id, error = %e, "authentication failed");
                self.registry
                    .deliver(
                        &Recipients::Connection(connection_id.clone()),
                        &ServerEvent::ConnectError {
                            code: e.code(),
                            message: e.to_string(),
                        },
                    )
                    .await;
                Flow::Terminate
            }
        }
    }

    /// Dispatch one parsed event.
    pub async fn dispatch(&self, connection_id: &ConnectionId, event: ClientEvent) -> Flow {
        let Some(sender) = self.registry.identity_of(connection_id).await else {
            if let ClientEvent::Authenticate {
                identity_id,
                room_code,
                kind,
            } = event
            {
                return self
                    .authenticate(connection_id, &identity_id, &room_code, kind)
                    .await;
            }
            tracing::debug!(connection = %connection_id, event = event.name(), "event before authentication ignored");
            return Flow::Continue;
        };

        let name = event.name();
        tracing::debug!(connection = %connection_id, identity = %sender.id, event = name, "dispatching event");
        if let Err(rejection) = self.handle(connection_id, &sender, event).await {
            tracing::warn!(
                identity = %sender.id,
                event = name,
                code = ?rejection.code,
                message = %rejection.message,
                "request failed"
            );
            self.registry
                .deliver(
                    &Recipients::Connection(connection_id.clone()),
                    &ServerEvent::RequestFailed {
                        event: name.to_string(),
                        code: rejection.code,
                        message: rejection.message,
                    },
                )
                .await;
        }
        Flow::Continue
    }

    async fn handle(
        &self,
        connection_id: &ConnectionId,
        sender: &BoundIdentity,
        event: ClientEvent,
    ) -> Result<(), Rejection> {
        match event {
            ClientEvent::Authenticate { .. } => {
                tracing::warn!(identity = %sender.id, "repeated authentication ignored");
            }
            ClientEvent::Ready => self.presence.ready(connection_id, sender).await,
            ClientEvent::SetName { name } => {
                self.presence.set_name(connection_id, sender, name).await?;
            }
            ClientEvent::UpdateUser {
                player_id,
                streamer_name,
                game_name,
            } => {
                self.presence
                    .update_user(sender, &player_id, streamer_name, game_name)
                    .await?;
            }
            ClientEvent::UploadFile { kills, placement } => {
                self.presence
                    .upload_file(connection_id, sender, kills, placement)
                    .await?;
            }
            ClientEvent::JoinTeam {
                team_uuid,
                audio_stream,
            } => {
                self.teams
                    .join(&team_name(team_uuid)?, &sender.id, connection_id, audio_stream)
                    .await?;
            }
            ClientEvent::LeaveTeam { team_uuid } => {
                self.teams.leave(&team_name(team_uuid)?, &sender.id).await?;
            }
            ClientEvent::CreateTeam {
                team_name: label,
                team_uuid,
            } => {
                self.teams
                    .create(team_name(team_uuid)?, Some(label), sender.id.clone(), Vec::new())
                    .await?;
            }
            ClientEvent::SubmitAddTeam {
                name,
                created_by,
                players,
            } => {
                let created_by = match created_by {
                    Some(id) => IdentityId::new(id)?,
                    None => sender.id.clone(),
                };
                self.teams
                    .create(team_name(name)?, None, created_by, identity_ids(players)?)
                    .await?;
            }
            ClientEvent::DeleteTeam { team_uuid: name } | ClientEvent::SubmitDelTeam { name } => {
                self.teams.delete(&team_name(name)?).await?;
            }
            ClientEvent::SubmitUpdateTeam {
                name,
                created_by,
                players,
            } => {
                self.teams
                    .update(
                        &team_name(name)?,
                        IdentityId::new(created_by)?,
                        identity_ids(players)?,
                    )
                    .await?;
            }
            ClientEvent::SendPlayerAudio {
                audio_stream,
                target_id,
            } => {
                self.relay.send_player_audio(&target_id, audio_stream).await;
            }
            ClientEvent::ChangeRemoteMute { remote_mute } => {
                self.relay
                    .change_remote_mute(connection_id, remote_mute)
                    .await;
            }
            ClientEvent::HostUnmute { id, host_id } => {
                self.relay.host_unmute(sender, &id, host_id).await;
            }
            ClientEvent::UnmuteHostTeam { team_uuid } => {
                self.relay
                    .unmute_host_team(sender, connection_id, team_name(team_uuid)?)
                    .await;
            }
            ClientEvent::UnmuteHostAll => {
                self.relay.unmute_host_all(sender, connection_id).await;
            }
            ClientEvent::MuteHost => {
                self.relay.mute_host(sender, connection_id).await;
            }
            ClientEvent::MessageHost { msg } => {
                self.relay.message_host(sender, msg).await;
            }
            event @ (ClientEvent::ScreenToHost
            | ClientEvent::AudioToHost
            | ClientEvent::RandomizeTeams) => {
                tracing::info!(identity = %sender.id, event = event.name(), "event has no server-side behavior");
            }
        }
        Ok(())
    }
}
