//! InMemory PresenceStore 実装
//!
//! ドメイン層が定義する PresenceStore trait の具体的な実装。
//! HashMap をインメモリ DB として使用します。
//!
//! ## 障害の模擬
//!
//! `set_available(false)` の間は全ての操作が `StoreError::Unavailable` を返します。
//! 外部ストアの一時的な障害時の挙動（リトライ、遅延書き込み）を検証するために使用します。

use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    Identity, IdentityId, IdentityKind, IdentityUpdate, PresenceStore, Room, RoomCode, StoreError, Team,
    TeamName, TeamUpdate,
};

/// インメモリ PresenceStore 実装
pub struct InMemoryStore {
    rooms: Mutex<HashMap<RoomCode, Room>>,
    users: Mutex<HashMap<IdentityId, Identity>>,
    /// 名前順で返すため BTreeMap を使用
    teams: Mutex<BTreeMap<TeamName, Team>>,
    available: AtomicBool,
}

impl InMemoryStore {
    /// 空の InMemoryStore を作成
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            teams: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// 指定したルームを登録済みの InMemoryStore を作成
    pub fn with_rooms(rooms: impl IntoIterator<Item = Room>) -> Self {
        let mut store = Self::new();
        {
            let map = store.rooms.get_mut();
            for room in rooms {
                map.insert(room.code.clone(), room);
            }
        }
        store
    }

    /// 障害状態を切り替える
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store is offline".to_string()))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceStore for InMemoryStore {
    async fn find_room(&self, code: &RoomCode) -> Result<Option<Room>, StoreError> {
        self.check_available()?;
        let rooms = self.rooms.lock().await;
        Ok(rooms.get(code).cloned())
    }

    async fn find_user(&self, id: &IdentityId) -> Result<Option<Identity>, StoreError> {
        self.check_available()?;
        let users = self.users.lock().await;
        Ok(users.get(id).cloned())
    }

    async fn upsert_user(
        &self,
        id: &IdentityId,
        fields: IdentityUpdate,
    ) -> Result<Identity, StoreError> {
        self.check_available()?;
        let mut users = self.users.lock().await;
        let identity = users.entry(id.clone()).or_insert_with(|| {
            Identity::new(id.clone(), fields.kind.unwrap_or(IdentityKind::Player))
        });
        fields.apply(identity);
        Ok(identity.clone())
    }

    async fn set_user_active(&self, id: &IdentityId, active: bool) -> Result<(), StoreError> {
        self.check_available()?;
        let mut users = self.users.lock().await;
        let identity = users
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        identity.active = active;
        Ok(())
    }

    async fn find_teams(&self) -> Result<Vec<Team>, StoreError> {
        self.check_available()?;
        let teams = self.teams.lock().await;
        Ok(teams.values().cloned().collect())
    }

    async fn find_team(&self, name: &TeamName) -> Result<Option<Team>, StoreError> {
        self.check_available()?;
        let teams = self.teams.lock().await;
        Ok(teams.get(name).cloned())
    }

    async fn create_team(&self, team: Team) -> Result<(), StoreError> {
        self.check_available()?;
        let mut teams = self.teams.lock().await;
        if teams.contains_key(&team.name) {
            return Err(StoreError::AlreadyExists(team.name.to_string()));
        }
        teams.insert(team.name.clone(), team);
        Ok(())
    }

    async fn update_team(&self, name: &TeamName, fields: TeamUpdate) -> Result<Team, StoreError> {
        self.check_available()?;
        let mut teams = self.teams.lock().await;
        let team = teams
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        fields.apply(team);
        Ok(team.clone())
    }

    async fn delete_team(&self, name: &TeamName) -> Result<(), StoreError> {
        self.check_available()?;
        let mut teams = self.teams.lock().await;
        teams.remove(name);
        Ok(())
    }
}
