//! WebSocket message DTOs for the presence relay.
//!
//! Every frame is a JSON object tagged by `"type"` (the event name); payload
//! fields sit beside the tag.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::{Attributes, Identity, IdentityKind, Team};

/// Opaque stream payload forwarded between clients without interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "kebab-case")]
pub enum StreamPayload {
    Structured(Value),
    Binary(Vec<u8>),
}

impl StreamPayload {
    /// Interpret a client-supplied value.
    ///
    /// An explicit `{"kind", "data"}` envelope is decoded as such; any other value
    /// is carried as `Structured`.
    pub fn from_value(value: Value) -> Self {
        if let Value::Object(map) = &value
            && map.len() == 2
            && map.contains_key("kind")
            && map.contains_key("data")
            && let Ok(payload) = serde_json::from_value::<StreamPayload>(value.clone())
        {
            return payload;
        }
        StreamPayload::Structured(value)
    }
}

fn deserialize_optional_payload<'de, D>(deserializer: D) -> Result<Option<StreamPayload>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.map(StreamPayload::from_value))
}

fn deserialize_payload<'de, D>(deserializer: D) -> Result<StreamPayload, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(StreamPayload::from_value)
}

/// Events sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    Authenticate {
        #[serde(rename = "identityId")]
        identity_id: String,
        #[serde(rename = "roomCode")]
        room_code: String,
        kind: IdentityKind,
    },
    Ready,
    SetName {
        name: String,
    },
    JoinTeam {
        #[serde(rename = "teamUUID")]
        team_uuid: String,
        #[serde(
            rename = "audioStream",
            default,
            deserialize_with = "deserialize_optional_payload",
            skip_serializing_if = "Option::is_none"
        )]
        audio_stream: Option<StreamPayload>,
    },
    SendPlayerAudio {
        #[serde(rename = "audioStream", deserialize_with = "deserialize_payload")]
        audio_stream: StreamPayload,
        #[serde(rename = "targetId")]
        target_id: String,
    },
    LeaveTeam {
        #[serde(rename = "teamUUID")]
        team_uuid: String,
    },
    CreateTeam {
        #[serde(rename = "teamName")]
        team_name: String,
        #[serde(rename = "teamUUID")]
        team_uuid: String,
    },
    SubmitAddTeam {
        name: String,
        #[serde(rename = "createdBy", default)]
        created_by: Option<String>,
        #[serde(default)]
        players: Vec<String>,
    },
    DeleteTeam {
        #[serde(rename = "teamUUID")]
        team_uuid: String,
    },
    SubmitDelTeam {
        name: String,
    },
    SubmitUpdateTeam {
        name: String,
        #[serde(rename = "createdBy")]
        created_by: String,
        #[serde(default)]
        players: Vec<String>,
    },
    UpdateUser {
        #[serde(rename = "playerId")]
        player_id: String,
        #[serde(rename = "streamerName", default)]
        streamer_name: Option<String>,
        #[serde(rename = "gameName", default)]
        game_name: Option<String>,
    },
    ChangeRemoteMute {
        #[serde(rename = "remoteMute")]
        remote_mute: bool,
    },
    HostUnmute {
        id: String,
        #[serde(rename = "hostId")]
        host_id: String,
    },
    UnmuteHostTeam {
        #[serde(rename = "teamUUID")]
        team_uuid: String,
    },
    UnmuteHostAll,
    MuteHost,
    UploadFile {
        #[serde(default)]
        kills: Option<i64>,
        #[serde(default)]
        placement: Option<i64>,
    },
    MessageHost {
        #[serde(default)]
        msg: Value,
    },
    ScreenToHost,
    AudioToHost,
    RandomizeTeams,
}

impl ClientEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate { .. } => "authenticate",
            ClientEvent::Ready => "ready",
            ClientEvent::SetName { .. } => "set-name",
            ClientEvent::JoinTeam { .. } => "join-team",
            ClientEvent::SendPlayerAudio { .. } => "send-player-audio",
            ClientEvent::LeaveTeam { .. } => "leave-team",
            ClientEvent::CreateTeam { .. } => "create-team",
            ClientEvent::SubmitAddTeam { .. } => "submit-add-team",
            ClientEvent::DeleteTeam { .. } => "delete-team",
            ClientEvent::SubmitDelTeam { .. } => "submit-del-team",
            ClientEvent::SubmitUpdateTeam { .. } => "submit-update-team",
            ClientEvent::UpdateUser { .. } => "update-user",
            ClientEvent::ChangeRemoteMute { .. } => "change-remote-mute",
            ClientEvent::HostUnmute { .. } => "host-unmute",
            ClientEvent::UnmuteHostTeam { .. } => "unmute-host-team",
            ClientEvent::UnmuteHostAll => "unmute-host-all",
            ClientEvent::MuteHost => "mute-host",
            ClientEvent::UploadFile { .. } => "upload-file",
            ClientEvent::MessageHost { .. } => "message-host",
            ClientEvent::ScreenToHost => "screen-to-host",
            ClientEvent::AudioToHost => "audio-to-host",
            ClientEvent::RandomizeTeams => "randomize-teams",
        }
    }
}

/// Machine-readable failure reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    AuthenticationFailure,
    RoomNotFound,
    TeamNotFound,
    DuplicateTeam,
    StoreUnavailable,
    /// Malformed identifier or team name in a request payload
    InvalidRequest,
    /// The requester may not act on the addressed identity
    NotPermitted,
}

/// Identity as seen by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: String,
    pub kind: IdentityKind,
    pub display_name: String,
    pub game_name: String,
    pub attributes: Attributes,
    pub active: bool,
}

impl From<&Identity> for UserDto {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.as_str().to_string(),
            kind: identity.kind,
            display_name: identity.display_name.clone(),
            game_name: identity.game_name.clone(),
            attributes: identity.attributes,
            active: identity.active,
        }
    }
}

/// Team as seen by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamDto {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_by: String,
    pub players: Vec<String>,
}

impl From<&Team> for TeamDto {
    fn from(team: &Team) -> Self {
        Self {
            name: team.name.as_str().to_string(),
            label: team.label.clone(),
            created_by: team.created_by.as_str().to_string(),
            players: team
                .players
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
        }
    }
}

/// Payload of `team-created`
///
/// `teamID` / `teamName` sit beside the full team state so clients that key
/// teams by id keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamCreatedDto {
    #[serde(rename = "teamID")]
    pub team_id: String,
    #[serde(rename = "teamName")]
    pub team_name: String,
    #[serde(flatten)]
    pub team: TeamDto,
}

impl From<&Team> for TeamCreatedDto {
    fn from(team: &Team) -> Self {
        let dto = TeamDto::from(team);
        Self {
            team_id: dto.name.clone(),
            team_name: dto.label.clone().unwrap_or_else(|| dto.name.clone()),
            team: dto,
        }
    }
}

/// Runtime settings handed to a client when it joins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSettings {
    /// How long clients wait for a peer to answer a signaling event
    pub signal_timeout_ms: u64,
}

/// Events sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    ConnectedAs {
        role: IdentityKind,
    },
    ConnectedInit {
        users: Vec<UserDto>,
        teams: Vec<TeamDto>,
        #[serde(rename = "eventSettings")]
        event_settings: EventSettings,
    },
    AddUser(UserDto),
    UpdateSelf(UserDto),
    DeleteUser {
        id: String,
    },
    UserDisconnected {
        #[serde(rename = "socketID")]
        socket_id: String,
    },
    PlayerReady {
        #[serde(rename = "socketID")]
        socket_id: String,
    },
    SetUserName {
        username: String,
        #[serde(rename = "socketId")]
        socket_id: String,
    },
    PlayerJoinedTeam {
        #[serde(rename = "socketID")]
        socket_id: String,
        #[serde(rename = "teamID")]
        team_id: String,
    },
    PlayerLeftTeam {
        #[serde(rename = "socketID")]
        socket_id: String,
        #[serde(rename = "teamID")]
        team_id: String,
    },
    TeamCreated(TeamCreatedDto),
    TeamDeleted {
        #[serde(rename = "teamID")]
        team_id: String,
    },
    UpdateTeam(TeamDto),
    PlayerJoinedAudio {
        #[serde(rename = "audioStream")]
        audio_stream: StreamPayload,
    },
    JoinMyAudio {
        #[serde(rename = "audioStream")]
        audio_stream: StreamPayload,
    },
    DisconnectMyAudio {
        #[serde(rename = "socketID")]
        socket_id: String,
    },
    UnmuteMe {
        #[serde(rename = "socketID")]
        socket_id: String,
    },
    MuteMe {
        #[serde(rename = "socketID")]
        socket_id: String,
    },
    HostUnmute {
        #[serde(rename = "hostUnmute")]
        host_unmute: String,
    },
    ChangeRemoteMute {
        #[serde(rename = "remoteMute")]
        remote_mute: bool,
    },
    PrivateMessage {
        #[serde(rename = "socketID")]
        socket_id: String,
        msg: Value,
    },
    RequestFailed {
        event: String,
        code: ErrorCode,
        message: String,
    },
    ConnectError {
        code: ErrorCode,
        message: String,
    },
}

impl ServerEvent {
    /// Wire name of the event, for logging
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ConnectedAs { .. } => "connected-as",
            ServerEvent::ConnectedInit { .. } => "connected-init",
            ServerEvent::AddUser(_) => "add-user",
            ServerEvent::UpdateSelf(_) => "update-self",
            ServerEvent::DeleteUser { .. } => "delete-user",
            ServerEvent::UserDisconnected { .. } => "user-disconnected",
            ServerEvent::PlayerReady { .. } => "player-ready",
            ServerEvent::SetUserName { .. } => "set-user-name",
            ServerEvent::PlayerJoinedTeam { .. } => "player-joined-team",
            ServerEvent::PlayerLeftTeam { .. } => "player-left-team",
            ServerEvent::TeamCreated(_) => "team-created",
            ServerEvent::TeamDeleted { .. } => "team-deleted",
            ServerEvent::UpdateTeam(_) => "update-team",
            ServerEvent::PlayerJoinedAudio { .. } => "player-joined-audio",
            ServerEvent::JoinMyAudio { .. } => "join-my-audio",
            ServerEvent::DisconnectMyAudio { .. } => "disconnect-my-audio",
            ServerEvent::UnmuteMe { .. } => "unmute-me",
            ServerEvent::MuteMe { .. } => "mute-me",
            ServerEvent::HostUnmute { .. } => "host-unmute",
            ServerEvent::ChangeRemoteMute { .. } => "change-remote-mute",
            ServerEvent::PrivateMessage { .. } => "private-message",
            ServerEvent::RequestFailed { .. } => "request-failed",
            ServerEvent::ConnectError { .. } => "connect-error",
        }
    }
}
