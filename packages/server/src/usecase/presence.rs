//! UseCase: 接続・切断時のプレゼンス同期
//!
//! 接続時はアイデンティティをストアと突き合わせ（新規作成または再アクティブ化）、
//! 到着を通知します。切断時は非アクティブ化・離脱通知・所属 Team からの離脱を行います。
//!
//! 同じアイデンティティに対する接続・切断処理は Identity ID ごとの `KeyedLock` で直列化されます。
//! ロックの取得順は常に「Identity → Team」であり、逆順で取得する経路はありません。
//!
//! ## 遅延書き込み
//!
//! 切断時のストア書き込み（非アクティブ化、Team 離脱）がリトライ上限まで失敗した場合は
//! キューに積み、次の接続成功時と定期タスクで再実行します。再実行前に同じアイデンティティが
//! 再接続していた場合、そのエントリは破棄されます。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - 接続時のスナップショットと到着通知、切断時の離脱通知
//! - 存在しないルームへの接続で何も作られないこと
//! - 再接続による旧接続の置き換えと、スナップショットの重複排除
//! - ストア障害時の遅延書き込み
//!
//! ### どのような状況を想定しているか
//! - 正常系：新規接続、再接続、切断
//! - 異常系：不正な識別子、存在しないルーム、ストア障害
//! - エッジケース：切断処理中の再接続

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use tokio::sync::Mutex;

use crate::{
    domain::{
        Attributes, ConnectionId, Identity, IdentityId, IdentityKind, IdentityUpdate,
        PresenceStore, RoomCode, TeamName,
    },
    infrastructure::{
        dto::websocket::{EventSettings, ServerEvent, TeamDto, UserDto},
        registry::{BoundIdentity, Channel, ConnectionRegistry, Recipients},
    },
};

use super::{
    error::{ConnectError, PresenceError, TeamError},
    retry::RetryPolicy,
    serial::KeyedLock,
    team::TeamCoordinator,
};

/// 切断時に完了できなかったストア書き込み
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredWrite {
    Deactivate(IdentityId),
    LeaveTeam(TeamName, IdentityId),
    /// 所属 Team の一覧すら取得できなかった場合
    LeaveAllTeams(IdentityId),
}

impl DeferredWrite {
    fn identity(&self) -> &IdentityId {
        match self {
            DeferredWrite::Deactivate(id)
            | DeferredWrite::LeaveTeam(_, id)
            | DeferredWrite::LeaveAllTeams(id) => id,
        }
    }
}

/// プレゼンス同期
pub struct PresenceSynchronizer {
    store: Arc<dyn PresenceStore>,
    registry: Arc<ConnectionRegistry>,
    teams: Arc<TeamCoordinator>,
    retry: RetryPolicy,
    settings: EventSettings,
    locks: KeyedLock<IdentityId>,
    /// 接続中のアイデンティティ（接続の生存期間だけ保持）
    online: Mutex<HashMap<IdentityId, Identity>>,
    deferred: Mutex<VecDeque<DeferredWrite>>,
}

impl PresenceSynchronizer {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        registry: Arc<ConnectionRegistry>,
        teams: Arc<TeamCoordinator>,
        retry: RetryPolicy,
        settings: EventSettings,
    ) -> Self {
        Self {
            store,
            registry,
            teams,
            retry,
            settings,
            locks: KeyedLock::new(),
            online: Mutex::new(HashMap::new()),
            deferred: Mutex::new(VecDeque::new()),
        }
    }

    /// 接続を認証し、ルームに参加させる
    ///
    /// 1. ルームコードを検証（存在しなければ何も書き込まずに失敗）
    /// 2. アイデンティティを新規作成、または再アクティブ化
    /// 3. アイデンティティ・ロール・所属 Team のチャンネルに参加
    /// 4. 本人にスナップショットを送信し、他の全接続に到着を通知
    ///
    /// # Errors
    ///
    /// いずれのエラーでも呼び出し側は接続を終了させます。
    pub async fn connect(
        &self,
        connection_id: &ConnectionId,
        identity_id: &str,
        room_code: &str,
        kind: IdentityKind,
    ) -> Result<Identity, ConnectError> {
        let identity_id = IdentityId::new(identity_id.to_string())?;
        let room_code = RoomCode::new(room_code.to_string())?;

        let room = self
            .retry
            .run("find_room", || self.store.find_room(&room_code))
            .await?;
        if room.is_none() {
            tracing::warn!(identity = %identity_id, room = %room_code, "connection to unknown room rejected");
            return Err(ConnectError::RoomNotFound(room_code.to_string()));
        }
        let teams = self.teams.list().await.map_err(|_| ConnectError::StoreUnavailable)?;

        let _guard = self.locks.lock(&identity_id).await;

        let identity = match self
            .retry
            .run("find_user", || self.store.find_user(&identity_id))
            .await?
        {
            Some(mut identity) => {
                self.retry
                    .run("set_user_active", || {
                        self.store.set_user_active(&identity_id, true)
                    })
                    .await?;
                identity.active = true;
                identity
            }
            None => {
                self.retry
                    .run("upsert_user", || {
                        self.store
                            .upsert_user(&identity_id, IdentityUpdate::activate(kind))
                    })
                    .await?
            }
        };

        match self
            .registry
            .bind_identity(connection_id, identity_id.clone(), kind)
            .await
        {
            Ok(Some(superseded)) => {
                tracing::info!(identity = %identity_id, superseded = %superseded, "reconnect replaced previous connection");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(identity = %identity_id, error = %e, "transport closed during authentication");
                if !self.registry.is_bound(&identity_id).await {
                    let pending = self.settle(DeferredWrite::Deactivate(identity_id.clone())).await;
                    self.defer(pending).await;
                }
                return Err(ConnectError::ConnectionClosed);
            }
        }

        self.registry
            .join_channel(connection_id, Channel::Identity(identity_id.clone()))
            .await;
        self.registry
            .join_channel(connection_id, Channel::for_role(kind))
            .await;
        for team in teams.iter().filter(|team| team.contains(&identity_id)) {
            self.registry
                .join_channel(connection_id, Channel::Team(team.name.clone()))
                .await;
        }

        let users = {
            let mut online = self.online.lock().await;
            online.insert(identity_id.clone(), identity.clone());
            let mut users: Vec<UserDto> = online
                .values()
                .filter(|other| other.id != identity_id && other.active)
                .map(UserDto::from)
                .collect();
            users.sort_by(|a, b| a.id.cmp(&b.id));
            users
        };

        let own = Recipients::Connection(connection_id.clone());
        self.registry
            .deliver(&own, &ServerEvent::ConnectedAs { role: kind })
            .await;
        self.registry
            .deliver(
                &own,
                &ServerEvent::ConnectedInit {
                    users,
                    teams: teams.iter().map(TeamDto::from).collect(),
                    event_settings: self.settings,
                },
            )
            .await;
        self.registry
            .deliver(
                &Recipients::AllExcept(connection_id.clone()),
                &ServerEvent::AddUser(UserDto::from(&identity)),
            )
            .await;

        tracing::info!(
            identity = %identity_id,
            kind = kind.as_str(),
            room = %room_code,
            connection = %connection_id,
            "identity connected"
        );
        Ok(identity)
    }

    /// 切断処理
    ///
    /// 離脱通知は接続ごとに高々1回です。置き換え済みの接続や未認証の接続では何もしません。
    ///
    /// # Returns
    ///
    /// 離脱したアイデンティティ
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> Option<BoundIdentity> {
        let departure = self.registry.unregister(connection_id).await?;
        let Some(identity) = departure.identity else {
            tracing::debug!(connection = %connection_id, "unauthenticated connection closed");
            return None;
        };

        let _guard = self.locks.lock(&identity.id).await;
        if self.registry.is_bound(&identity.id).await {
            tracing::info!(identity = %identity.id, "identity reconnected before cleanup, departure skipped");
            return Some(identity);
        }

        self.online.lock().await.remove(&identity.id);
        self.registry
            .deliver(
                &Recipients::All,
                &ServerEvent::UserDisconnected {
                    socket_id: identity.id.to_string(),
                },
            )
            .await;
        self.registry
            .deliver(
                &Recipients::All,
                &ServerEvent::DeleteUser {
                    id: identity.id.to_string(),
                },
            )
            .await;

        let mut pending = self.settle(DeferredWrite::Deactivate(identity.id.clone())).await;
        pending.extend(
            self.settle(DeferredWrite::LeaveAllTeams(identity.id.clone()))
                .await,
        );
        self.defer(pending).await;

        tracing::info!(identity = %identity.id, connection = %connection_id, "identity disconnected");
        Some(identity)
    }

    /// 準備完了を他の全接続に通知
    pub async fn ready(&self, connection_id: &ConnectionId, sender: &BoundIdentity) {
        self.registry
            .deliver(
                &Recipients::AllExcept(connection_id.clone()),
                &ServerEvent::PlayerReady {
                    socket_id: sender.id.to_string(),
                },
            )
            .await;
    }

    /// 表示名を変更
    ///
    /// 本人に `update-self`、他の全接続に `set-user-name` を送ります。
    pub async fn set_name(
        &self,
        connection_id: &ConnectionId,
        sender: &BoundIdentity,
        name: String,
    ) -> Result<Identity, PresenceError> {
        let _guard = self.locks.lock(&sender.id).await;
        let fields = IdentityUpdate {
            display_name: Some(name.clone()),
            ..IdentityUpdate::default()
        };
        let identity = self
            .retry
            .run("upsert_user", || self.store.upsert_user(&sender.id, fields.clone()))
            .await?;
        self.remember(&identity).await;

        self.registry
            .deliver(
                &Recipients::Connection(connection_id.clone()),
                &ServerEvent::UpdateSelf(UserDto::from(&identity)),
            )
            .await;
        self.registry
            .deliver(
                &Recipients::AllExcept(connection_id.clone()),
                &ServerEvent::SetUserName {
                    username: name,
                    socket_id: sender.id.to_string(),
                },
            )
            .await;
        Ok(identity)
    }

    /// プレイヤーの配信者名・ゲーム名を変更
    ///
    /// ホストは任意のプレイヤーを、プレイヤーは自分自身のみを更新できます。
    /// 対象が接続中なら `update-self` を、配信者名が変わった場合は全接続に
    /// `set-user-name` を送ります。
    pub async fn update_user(
        &self,
        sender: &BoundIdentity,
        player_id: &str,
        streamer_name: Option<String>,
        game_name: Option<String>,
    ) -> Result<Identity, PresenceError> {
        let player_id = IdentityId::new(player_id.to_string())
            .map_err(|_| PresenceError::UnknownIdentity(player_id.to_string()))?;
        if sender.kind != IdentityKind::Host && sender.id != player_id {
            tracing::warn!(identity = %sender.id, target = %player_id, "update-user for another identity rejected");
            return Err(PresenceError::NotPermitted(player_id.to_string()));
        }
        let _guard = self.locks.lock(&player_id).await;

        if self
            .retry
            .run("find_user", || self.store.find_user(&player_id))
            .await?
            .is_none()
        {
            return Err(PresenceError::UnknownIdentity(player_id.to_string()));
        }

        let fields = IdentityUpdate {
            display_name: streamer_name.clone(),
            game_name,
            ..IdentityUpdate::default()
        };
        let identity = self
            .retry
            .run("upsert_user", || self.store.upsert_user(&player_id, fields.clone()))
            .await?;
        self.remember(&identity).await;

        self.registry
            .deliver(
                &Recipients::Channel(Channel::Identity(player_id.clone())),
                &ServerEvent::UpdateSelf(UserDto::from(&identity)),
            )
            .await;
        if let Some(username) = streamer_name {
            self.registry
                .deliver(
                    &Recipients::All,
                    &ServerEvent::SetUserName {
                        username,
                        socket_id: player_id.to_string(),
                    },
                )
                .await;
        }
        Ok(identity)
    }

    /// 試合結果（キル数・順位）を記録
    ///
    /// 指定された値のみを置き換え、更新後のレコードを本人に `update-self` で返します。
    pub async fn upload_file(
        &self,
        connection_id: &ConnectionId,
        sender: &BoundIdentity,
        kills: Option<i64>,
        placement: Option<i64>,
    ) -> Result<Identity, PresenceError> {
        let _guard = self.locks.lock(&sender.id).await;

        let current = self
            .retry
            .run("find_user", || self.store.find_user(&sender.id))
            .await?
            .ok_or_else(|| PresenceError::UnknownIdentity(sender.id.to_string()))?;
        let attributes = Attributes {
            kills: kills.unwrap_or(current.attributes.kills),
            placement: placement.unwrap_or(current.attributes.placement),
        };
        let fields = IdentityUpdate {
            attributes: Some(attributes),
            ..IdentityUpdate::default()
        };
        let identity = self
            .retry
            .run("upsert_user", || self.store.upsert_user(&sender.id, fields.clone()))
            .await?;
        self.remember(&identity).await;

        self.registry
            .deliver(
                &Recipients::Connection(connection_id.clone()),
                &ServerEvent::UpdateSelf(UserDto::from(&identity)),
            )
            .await;
        Ok(identity)
    }

    /// 遅延書き込みを再実行
    ///
    /// # Returns
    ///
    /// 再実行後も残っている書き込みの数
    pub async fn flush_deferred(&self) -> usize {
        let queued: Vec<DeferredWrite> = self.deferred.lock().await.drain(..).collect();
        if queued.is_empty() {
            return 0;
        }

        let mut remaining = Vec::new();
        for write in queued {
            let identity_id = write.identity().clone();
            let _guard = self.locks.lock(&identity_id).await;
            if self.registry.is_bound(&identity_id).await {
                tracing::debug!(identity = %identity_id, write = ?write, "deferred write dropped, identity reconnected");
                continue;
            }
            remaining.extend(self.settle(write).await);
        }

        let left = remaining.len();
        self.defer(remaining).await;
        tracing::info!(remaining = left, "flushed deferred presence writes");
        left
    }

    /// キューに残っている遅延書き込み
    pub async fn pending_writes(&self) -> Vec<DeferredWrite> {
        self.deferred.lock().await.iter().cloned().collect()
    }

    /// 書き込みを1つ実行し、完了できなかったものを返す
    async fn settle(&self, write: DeferredWrite) -> Vec<DeferredWrite> {
        match write {
            DeferredWrite::Deactivate(id) => {
                match self
                    .retry
                    .run("set_user_active", || self.store.set_user_active(&id, false))
                    .await
                {
                    Ok(()) => Vec::new(),
                    Err(e) if e.is_transient() => vec![DeferredWrite::Deactivate(id)],
                    Err(e) => {
                        tracing::warn!(identity = %id, error = %e, "deactivation dropped");
                        Vec::new()
                    }
                }
            }
            DeferredWrite::LeaveTeam(name, id) => self.leave_team(name, id).await.into_iter().collect(),
            DeferredWrite::LeaveAllTeams(id) => match self.teams.teams_of(&id).await {
                Ok(names) => {
                    let mut rest = Vec::new();
                    for name in names {
                        rest.extend(self.leave_team(name, id.clone()).await);
                    }
                    rest
                }
                Err(e) => {
                    tracing::warn!(identity = %id, error = %e, "could not list teams for departure");
                    vec![DeferredWrite::LeaveAllTeams(id)]
                }
            },
        }
    }

    async fn leave_team(&self, name: TeamName, id: IdentityId) -> Option<DeferredWrite> {
        match self.teams.leave(&name, &id).await {
            Ok(_) => None,
            Err(TeamError::StoreUnavailable) => Some(DeferredWrite::LeaveTeam(name, id)),
            Err(e) => {
                tracing::debug!(team = %name, identity = %id, error = %e, "team leave on departure skipped");
                None
            }
        }
    }

    async fn defer(&self, writes: Vec<DeferredWrite>) {
        if writes.is_empty() {
            return;
        }
        tracing::warn!(count = writes.len(), "presence writes deferred until the store recovers");
        self.deferred.lock().await.extend(writes);
    }

    async fn remember(&self, identity: &Identity) {
        let mut online = self.online.lock().await;
        if let Some(entry) = online.get_mut(&identity.id) {
            *entry = identity.clone();
        }
    }
}
