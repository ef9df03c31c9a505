//! Core domain models for the presence relay.

use serde::{Deserialize, Serialize};

use super::value_object::{IdentityId, RoomCode, TeamName};

/// Role a connection authenticates as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Player,
    Host,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Player => "player",
            IdentityKind::Host => "host",
        }
    }
}

/// Per-identity game statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub kills: i64,
    pub placement: i64,
}

/// A persistent player or host record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Client-supplied stable identifier
    pub id: IdentityId,
    pub kind: IdentityKind,
    pub display_name: String,
    pub game_name: String,
    pub attributes: Attributes,
    /// Whether a live connection currently holds this identity
    pub active: bool,
}

impl Identity {
    /// Create a new identity with default attributes.
    ///
    /// The display name defaults to the identity id.
    pub fn new(id: IdentityId, kind: IdentityKind) -> Self {
        Self {
            display_name: id.as_str().to_string(),
            id,
            kind,
            game_name: String::new(),
            attributes: Attributes::default(),
            active: false,
        }
    }
}

/// A room a client can join by presenting its code.
///
/// Read-only for the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub code: RoomCode,
    pub title: Option<String>,
}

impl Room {
    pub fn new(code: RoomCode) -> Self {
        Self { code, title: None }
    }
}

/// A named group of players
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Unique key
    pub name: TeamName,
    /// Human-readable label, when the creator supplied one separately from the key
    pub label: Option<String>,
    pub created_by: IdentityId,
    /// Ordered member list without duplicates
    pub players: Vec<IdentityId>,
}

impl Team {
    /// Create a team. Duplicate players are dropped, keeping first occurrence order.
    pub fn new(
        name: TeamName,
        label: Option<String>,
        created_by: IdentityId,
        players: Vec<IdentityId>,
    ) -> Self {
        Self {
            name,
            label,
            created_by,
            players: dedup_players(players),
        }
    }

    /// Whether the identity is a member of this team
    pub fn contains(&self, identity_id: &IdentityId) -> bool {
        self.players.contains(identity_id)
    }

    /// Append a player.
    ///
    /// Returns `false` when the player was already a member.
    pub fn add_player(&mut self, identity_id: IdentityId) -> bool {
        if self.contains(&identity_id) {
            return false;
        }
        self.players.push(identity_id);
        true
    }

    /// Remove a player.
    ///
    /// Returns `false` when the player was not a member.
    pub fn remove_player(&mut self, identity_id: &IdentityId) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p != identity_id);
        self.players.len() != before
    }

    /// Replace all mutable fields
    pub fn replace(&mut self, created_by: IdentityId, players: Vec<IdentityId>) {
        self.created_by = created_by;
        self.players = dedup_players(players);
    }
}

fn dedup_players(players: Vec<IdentityId>) -> Vec<IdentityId> {
    let mut unique: Vec<IdentityId> = Vec::with_capacity(players.len());
    for player in players {
        if !unique.contains(&player) {
            unique.push(player);
        }
    }
    unique
}
