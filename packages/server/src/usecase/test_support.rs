//! UseCase 層のテスト用ヘルパー

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::{
    domain::{
        ConnectionId, Identity, IdentityId, IdentityKind, IdentityUpdate, PresenceStore, Room,
        RoomCode, StoreError, Team, TeamName, TeamUpdate,
    },
    infrastructure::{
        dto::websocket::{EventSettings, ServerEvent},
        registry::{Channel, ConnectionRegistry},
        repository::InMemoryStore,
    },
};

use super::{
    presence::PresenceSynchronizer, relay::SignalingRelay, retry::RetryPolicy,
    team::TeamCoordinator,
};

pub fn id(value: &str) -> IdentityId {
    IdentityId::new(value.to_string()).unwrap()
}

pub fn team_name(value: &str) -> TeamName {
    TeamName::new(value.to_string()).unwrap()
}

/// リトライ待ちでテストが遅くならない方針
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 2,
        backoff: Duration::from_millis(1),
        timeout: Duration::from_millis(500),
    }
}

/// 接続中のサービス一式
pub struct Harness {
    pub registry: Arc<ConnectionRegistry>,
    pub teams: Arc<TeamCoordinator>,
    pub presence: Arc<PresenceSynchronizer>,
    pub relay: Arc<SignalingRelay>,
}

impl Harness {
    /// ルーム "party" を持つインメモリストアで構築
    pub fn new() -> Self {
        Self::in_memory().0
    }

    pub fn in_memory() -> (Self, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::with_rooms([Room::new(
            RoomCode::new("party".to_string()).unwrap(),
        )]));
        (Self::with_store(store.clone()), store)
    }

    pub fn with_store(store: Arc<dyn PresenceStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let teams = Arc::new(TeamCoordinator::new(
            store.clone(),
            registry.clone(),
            fast_retry(),
        ));
        let presence = Arc::new(PresenceSynchronizer::new(
            store,
            registry.clone(),
            teams.clone(),
            fast_retry(),
            EventSettings {
                signal_timeout_ms: 5_000,
            },
        ));
        let relay = Arc::new(SignalingRelay::new(registry.clone()));
        Self {
            registry,
            teams,
            presence,
            relay,
        }
    }
}

/// 未認証の接続を登録
pub async fn register(registry: &ConnectionRegistry) -> (ConnectionId, UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (registry.register(tx).await, rx)
}

/// ストアを介さずにアイデンティティを紐付けた接続を登録
pub async fn connect_as(
    registry: &ConnectionRegistry,
    identity: &str,
    kind: IdentityKind,
) -> (ConnectionId, UnboundedReceiver<String>) {
    let (conn, rx) = register(registry).await;
    registry.bind_identity(&conn, id(identity), kind).await.unwrap();
    registry
        .join_channel(&conn, Channel::Identity(id(identity)))
        .await;
    registry.join_channel(&conn, Channel::for_role(kind)).await;
    (conn, rx)
}

/// 受信済みのイベントを全て取り出す
pub fn drain_events(rx: &mut UnboundedReceiver<String>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(text) = rx.try_recv() {
        events.push(serde_json::from_str(&text).unwrap());
    }
    events
}

/// 各呼び出しの前に待機を挟むストア
///
/// 読み込みと書き込みの間に他のタスクが割り込める状態を作ります。
pub struct SlowStore {
    inner: InMemoryStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl PresenceStore for SlowStore {
    async fn find_room(&self, code: &RoomCode) -> Result<Option<Room>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_room(code).await
    }

    async fn find_user(&self, id: &IdentityId) -> Result<Option<Identity>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_user(id).await
    }

    async fn upsert_user(
        &self,
        id: &IdentityId,
        fields: IdentityUpdate,
    ) -> Result<Identity, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert_user(id, fields).await
    }

    async fn set_user_active(&self, id: &IdentityId, active: bool) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.set_user_active(id, active).await
    }

    async fn find_teams(&self) -> Result<Vec<Team>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_teams().await
    }

    async fn find_team(&self, name: &TeamName) -> Result<Option<Team>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_team(name).await
    }

    async fn create_team(&self, team: Team) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.create_team(team).await
    }

    async fn update_team(&self, name: &TeamName, fields: TeamUpdate) -> Result<Team, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.update_team(name, fields).await
    }

    async fn delete_team(&self, name: &TeamName) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete_team(name).await
    }
}
