//! 永続ストアの抽象化
//!
//! ドメイン層が定義する Repository trait。
//! UseCase 層はこの trait に依存し、具体的な実装（インメモリ、DB ドライバ等）には依存しません（依存性の逆転）。
//!
//! ストアはライブ接続の集合とは独立して遅延・失敗し得るため、全ての操作は
//! `Result<_, StoreError>` を返します。

use async_trait::async_trait;

use super::{
    entity::{Attributes, Identity, IdentityKind, Room, Team},
    error::StoreError,
    value_object::{IdentityId, RoomCode, TeamName},
};

/// Identity の部分更新
///
/// `None` のフィールドは変更しません。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityUpdate {
    pub kind: Option<IdentityKind>,
    pub display_name: Option<String>,
    pub game_name: Option<String>,
    pub attributes: Option<Attributes>,
    pub active: Option<bool>,
}

impl IdentityUpdate {
    /// 新規作成または再アクティブ化用の更新
    pub fn activate(kind: IdentityKind) -> Self {
        Self {
            kind: Some(kind),
            active: Some(true),
            ..Self::default()
        }
    }

    /// 更新を Identity に適用
    pub fn apply(&self, identity: &mut Identity) {
        if let Some(kind) = self.kind {
            identity.kind = kind;
        }
        if let Some(display_name) = &self.display_name {
            identity.display_name = display_name.clone();
        }
        if let Some(game_name) = &self.game_name {
            identity.game_name = game_name.clone();
        }
        if let Some(attributes) = self.attributes {
            identity.attributes = attributes;
        }
        if let Some(active) = self.active {
            identity.active = active;
        }
    }
}

/// Team の部分更新
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamUpdate {
    pub created_by: Option<IdentityId>,
    pub players: Option<Vec<IdentityId>>,
}

impl TeamUpdate {
    /// メンバー一覧のみを書き換える更新
    pub fn players(players: Vec<IdentityId>) -> Self {
        Self {
            created_by: None,
            players: Some(players),
        }
    }

    /// 更新を Team に適用
    pub fn apply(&self, team: &mut Team) {
        let created_by = self
            .created_by
            .clone()
            .unwrap_or_else(|| team.created_by.clone());
        let players = self
            .players
            .clone()
            .unwrap_or_else(|| team.players.clone());
        team.replace(created_by, players);
    }
}

/// 永続ストア（Room / User / Team レコードの CRUD）
///
/// 全ての操作は結果整合であり、一時的に失敗し得ます。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// ルームコードに一致する Room を取得
    async fn find_room(&self, code: &RoomCode) -> Result<Option<Room>, StoreError>;

    /// Identity を取得
    async fn find_user(&self, id: &IdentityId) -> Result<Option<Identity>, StoreError>;

    /// Identity を作成または部分更新し、更新後のレコードを返す
    async fn upsert_user(
        &self,
        id: &IdentityId,
        fields: IdentityUpdate,
    ) -> Result<Identity, StoreError>;

    /// Identity の active フラグを設定
    async fn set_user_active(&self, id: &IdentityId, active: bool) -> Result<(), StoreError>;

    /// 全ての Team を名前順で取得
    async fn find_teams(&self) -> Result<Vec<Team>, StoreError>;

    /// Team を取得
    async fn find_team(&self, name: &TeamName) -> Result<Option<Team>, StoreError>;

    /// Team を作成（同名の Team が存在する場合は `StoreError::AlreadyExists`）
    async fn create_team(&self, team: Team) -> Result<(), StoreError>;

    /// Team を部分更新し、更新後のレコードを返す
    async fn update_team(&self, name: &TeamName, fields: TeamUpdate) -> Result<Team, StoreError>;

    /// Team を削除（存在しない場合も成功）
    async fn delete_team(&self, name: &TeamName) -> Result<(), StoreError>;
}
