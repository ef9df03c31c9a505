//! Live connection registry.
//!
//! Tracks every transport session, the identity it authenticated as and the
//! broadcast channels it belongs to, and fans serialized events out to them.
//!
//! A single process-wide lock guards all maps. Every operation is short and
//! never awaits while holding it except on the lock itself; sends go through
//! unbounded channels and do not block.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use partyline_shared::time::get_jst_timestamp;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc::UnboundedSender};

use crate::{
    domain::{ConnectionId, ConnectionIdFactory, IdentityId, IdentityKind, TeamName, Timestamp},
    infrastructure::dto::websocket::ServerEvent,
};

/// Named broadcast group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Players,
    Host,
    Team(TeamName),
    /// Direct addressing of a single identity
    Identity(IdentityId),
}

impl Channel {
    /// Channel shared by every connection of the given role
    pub fn for_role(kind: IdentityKind) -> Self {
        match kind {
            IdentityKind::Player => Channel::Players,
            IdentityKind::Host => Channel::Host,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Players => write!(f, "players"),
            Channel::Host => write!(f, "host"),
            Channel::Team(name) => write!(f, "team:{name}"),
            Channel::Identity(id) => write!(f, "identity:{id}"),
        }
    }
}

/// Explicit recipient set of an outbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    All,
    AllExcept(ConnectionId),
    Connection(ConnectionId),
    Channel(Channel),
    ChannelExcept(Channel, ConnectionId),
}

/// Identity a connection authenticated as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundIdentity {
    pub id: IdentityId,
    pub kind: IdentityKind,
}

/// Result of unregistering a connection, produced once per connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub connection_id: ConnectionId,
    /// `None` when the connection never authenticated
    pub identity: Option<BoundIdentity>,
    pub channels: Vec<Channel>,
}

/// Point-in-time view of one connection
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub connection_id: ConnectionId,
    pub identity: Option<BoundIdentity>,
    pub channels: Vec<Channel>,
    pub connected_at: Timestamp,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection '{0}' is not registered")]
    ConnectionNotFound(ConnectionId),
}

struct ConnectionEntry {
    sender: UnboundedSender<String>,
    identity: Option<BoundIdentity>,
    channels: HashSet<Channel>,
    connected_at: Timestamp,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    channels: HashMap<Channel, HashSet<ConnectionId>>,
    /// identity id -> the single connection currently holding it
    bindings: HashMap<IdentityId, ConnectionId>,
}

impl RegistryState {
    fn join(&mut self, connection_id: &ConnectionId, channel: Channel) -> bool {
        let Some(entry) = self.connections.get_mut(connection_id) else {
            return false;
        };
        if !entry.channels.insert(channel.clone()) {
            return false;
        }
        self.channels
            .entry(channel)
            .or_default()
            .insert(connection_id.clone());
        true
    }

    fn leave(&mut self, connection_id: &ConnectionId, channel: &Channel) -> bool {
        let Some(entry) = self.connections.get_mut(connection_id) else {
            return false;
        };
        if !entry.channels.remove(channel) {
            return false;
        }
        self.remove_member(channel, connection_id);
        true
    }

    fn remove_member(&mut self, channel: &Channel, connection_id: &ConnectionId) {
        if let Some(members) = self.channels.get_mut(channel) {
            members.remove(connection_id);
            if members.is_empty() {
                self.channels.remove(channel);
            }
        }
    }

    /// Remove a connection and every membership it holds.
    fn remove(&mut self, connection_id: &ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(connection_id)?;
        for channel in &entry.channels {
            self.remove_member(channel, connection_id);
        }
        if let Some(identity) = &entry.identity
            && self.bindings.get(&identity.id) == Some(connection_id)
        {
            self.bindings.remove(&identity.id);
        }
        Some(entry)
    }

    fn targets(&self, recipients: &Recipients) -> Vec<ConnectionId> {
        match recipients {
            Recipients::All => self.connections.keys().cloned().collect(),
            Recipients::AllExcept(excluded) => self
                .connections
                .keys()
                .filter(|id| *id != excluded)
                .cloned()
                .collect(),
            Recipients::Connection(id) => {
                if self.connections.contains_key(id) {
                    vec![id.clone()]
                } else {
                    Vec::new()
                }
            }
            Recipients::Channel(channel) => self
                .channels
                .get(channel)
                .map(|members| members.iter().cloned().collect())
                .unwrap_or_default(),
            Recipients::ChannelExcept(channel, excluded) => self
                .channels
                .get(channel)
                .map(|members| {
                    members
                        .iter()
                        .filter(|id| *id != excluded)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Registry of live connections and their channel memberships
#[derive(Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new transport session.
    ///
    /// `sender` receives every serialized event addressed to the connection.
    pub async fn register(&self, sender: UnboundedSender<String>) -> ConnectionId {
        let connection_id = ConnectionIdFactory::generate();
        let mut state = self.state.lock().await;
        state.connections.insert(
            connection_id.clone(),
            ConnectionEntry {
                sender,
                identity: None,
                channels: HashSet::new(),
                connected_at: Timestamp::new(get_jst_timestamp()),
            },
        );
        tracing::debug!(connection = %connection_id, "connection registered");
        connection_id
    }

    /// Bind an authenticated identity to a connection.
    ///
    /// A previous connection holding the same identity is superseded: it is
    /// removed from the registry together with its memberships, and its sender is
    /// dropped so its transport closes. Unregistering it later yields no departure.
    ///
    /// Returns the superseded connection, if any.
    pub async fn bind_identity(
        &self,
        connection_id: &ConnectionId,
        identity_id: IdentityId,
        kind: IdentityKind,
    ) -> Result<Option<ConnectionId>, RegistryError> {
        let mut state = self.state.lock().await;
        let entry = state
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RegistryError::ConnectionNotFound(connection_id.clone()))?;
        let previous_identity = entry.identity.replace(BoundIdentity {
            id: identity_id.clone(),
            kind,
        });

        if let Some(previous) = previous_identity
            && previous.id != identity_id
            && state.bindings.get(&previous.id) == Some(connection_id)
        {
            state.bindings.remove(&previous.id);
        }

        let superseded = state
            .bindings
            .insert(identity_id.clone(), connection_id.clone())
            .filter(|previous| previous != connection_id);

        if let Some(previous) = &superseded {
            // The old entry no longer owns the binding, so removal leaves it intact.
            if let Some(old) = state.connections.remove(previous) {
                for channel in &old.channels {
                    state.remove_member(channel, previous);
                }
            }
            tracing::info!(
                identity = %identity_id,
                superseded = %previous,
                connection = %connection_id,
                "identity superseded by a new connection"
            );
        }

        Ok(superseded)
    }

    /// Add a connection to a channel. Returns `false` if it already was a member.
    pub async fn join_channel(&self, connection_id: &ConnectionId, channel: Channel) -> bool {
        self.state.lock().await.join(connection_id, channel)
    }

    /// Remove a connection from a channel. Returns `false` if it was not a member.
    pub async fn leave_channel(&self, connection_id: &ConnectionId, channel: &Channel) -> bool {
        self.state.lock().await.leave(connection_id, channel)
    }

    /// Remove whichever connection holds `identity_id` from a channel.
    pub async fn leave_channel_by_identity(
        &self,
        identity_id: &IdentityId,
        channel: &Channel,
    ) -> bool {
        let mut state = self.state.lock().await;
        let Some(connection_id) = state.bindings.get(identity_id).cloned() else {
            return false;
        };
        state.leave(&connection_id, channel)
    }

    /// Add whichever connection holds `identity_id` to a channel.
    pub async fn join_channel_by_identity(
        &self,
        identity_id: &IdentityId,
        channel: Channel,
    ) -> bool {
        let mut state = self.state.lock().await;
        let Some(connection_id) = state.bindings.get(identity_id).cloned() else {
            return false;
        };
        state.join(&connection_id, channel)
    }

    /// Remove every member from a channel, returning the former members.
    pub async fn clear_channel(&self, channel: &Channel) -> Vec<ConnectionId> {
        let mut state = self.state.lock().await;
        let members: Vec<ConnectionId> = state
            .channels
            .remove(channel)
            .map(|members| members.into_iter().collect())
            .unwrap_or_default();
        for member in &members {
            if let Some(entry) = state.connections.get_mut(member) {
                entry.channels.remove(channel);
            }
        }
        members
    }

    /// Remove a connection.
    ///
    /// Idempotent: only the first call for a registered connection returns a
    /// departure. Superseded connections were already removed and yield `None`.
    pub async fn unregister(&self, connection_id: &ConnectionId) -> Option<Departure> {
        let entry = self.state.lock().await.remove(connection_id)?;
        tracing::debug!(connection = %connection_id, "connection unregistered");
        Some(Departure {
            connection_id: connection_id.clone(),
            identity: entry.identity,
            channels: entry.channels.into_iter().collect(),
        })
    }

    /// Identity bound to a connection
    pub async fn identity_of(&self, connection_id: &ConnectionId) -> Option<BoundIdentity> {
        let state = self.state.lock().await;
        state
            .connections
            .get(connection_id)
            .and_then(|entry| entry.identity.clone())
    }

    /// Connection currently holding an identity
    pub async fn connection_of(&self, identity_id: &IdentityId) -> Option<ConnectionId> {
        self.state.lock().await.bindings.get(identity_id).cloned()
    }

    /// Whether any live connection holds the identity
    pub async fn is_bound(&self, identity_id: &IdentityId) -> bool {
        self.state.lock().await.bindings.contains_key(identity_id)
    }

    /// Current members of a channel
    pub async fn channel_members(&self, channel: &Channel) -> Vec<ConnectionId> {
        self.state.lock().await.targets(&Recipients::Channel(channel.clone()))
    }

    /// Resolve a client-supplied target (identity id or connection id).
    ///
    /// Identity channels take precedence over raw connection ids.
    pub async fn resolve_target(&self, target: &str) -> Option<Recipients> {
        let state = self.state.lock().await;
        if let Ok(identity_id) = IdentityId::new(target.to_string()) {
            let channel = Channel::Identity(identity_id);
            if state.channels.contains_key(&channel) {
                return Some(Recipients::Channel(channel));
            }
        }
        let connection_id = ConnectionId::parse(target).ok()?;
        state
            .connections
            .contains_key(&connection_id)
            .then_some(Recipients::Connection(connection_id))
    }

    /// Serialize an event once and send it to every recipient.
    ///
    /// A failed send to one recipient does not prevent delivery to the others.
    /// Returns the number of connections the event was handed to.
    pub async fn deliver(&self, recipients: &Recipients, event: &ServerEvent) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(event = event.name(), error = %e, "failed to serialize event");
                return 0;
            }
        };

        let state = self.state.lock().await;
        let targets = state.targets(recipients);
        let mut delivered = 0;
        for target in &targets {
            let Some(entry) = state.connections.get(target) else {
                continue;
            };
            if entry.sender.send(json.clone()).is_err() {
                tracing::warn!(
                    event = event.name(),
                    connection = %target,
                    "failed to send event to connection"
                );
            } else {
                delivered += 1;
            }
        }
        tracing::debug!(
            event = event.name(),
            recipients = ?recipients,
            delivered,
            "delivered event"
        );
        delivered
    }

    /// Number of live connections
    pub async fn count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// All live connections, oldest first
    pub async fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        let state = self.state.lock().await;
        let mut snapshot: Vec<ConnectionSnapshot> = state
            .connections
            .iter()
            .map(|(id, entry)| {
                let mut channels: Vec<Channel> = entry.channels.iter().cloned().collect();
                channels.sort_by_key(|c| c.to_string());
                ConnectionSnapshot {
                    connection_id: id.clone(),
                    identity: entry.identity.clone(),
                    channels,
                    connected_at: entry.connected_at,
                }
            })
            .collect();
        snapshot.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.connection_id.as_str().cmp(b.connection_id.as_str()))
        });
        snapshot
    }
}
