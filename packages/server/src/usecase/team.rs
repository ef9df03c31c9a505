//! UseCase: Team の作成・更新・削除・参加・離脱
//!
//! 全ての変更操作は Team 名ごとの `KeyedLock` の内側で
//! 「読み込み → 新しい players の計算 → 書き戻し → 通知」を完結させます。
//! 同じ Team への2つの変更が交互に実行されることはなく、古い読み込み結果で
//! 上書きして更新が失われることもありません。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - TeamCoordinator の各操作と、その通知先・通知回数
//! - 同一 Team への並行した join / leave の直列化
//!
//! ### なぜこのテストが必要か
//! - 並行更新による更新喪失は、素朴な実装で最も起きやすい不具合
//! - 通知の重複・欠落はクライアント側の表示に直結する
//!
//! ### どのような状況を想定しているか
//! - 正常系：作成・参加・離脱・更新・削除
//! - 異常系：重複作成、存在しない Team、ストア障害
//! - エッジケース：冪等な参加・離脱、並行操作

use std::sync::Arc;

use crate::{
    domain::{ConnectionId, IdentityId, PresenceStore, Team, TeamName, TeamUpdate},
    infrastructure::{
        dto::websocket::{ServerEvent, StreamPayload, TeamCreatedDto, TeamDto},
        registry::{Channel, ConnectionRegistry, Recipients},
    },
};

use super::{error::TeamError, retry::RetryPolicy, serial::KeyedLock};

/// Team 操作のコーディネーター
pub struct TeamCoordinator {
    store: Arc<dyn PresenceStore>,
    registry: Arc<ConnectionRegistry>,
    retry: RetryPolicy,
    locks: KeyedLock<TeamName>,
}

impl TeamCoordinator {
    /// 新しい TeamCoordinator を作成
    pub fn new(
        store: Arc<dyn PresenceStore>,
        registry: Arc<ConnectionRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            retry,
            locks: KeyedLock::new(),
        }
    }

    /// Team を作成し、全接続に `team-created` を通知
    ///
    /// 初期メンバーのうち接続中のものは Team チャンネルに参加させます。
    ///
    /// # Errors
    ///
    /// * `TeamError::DuplicateTeam` - 同名の Team が既に存在する
    /// * `TeamError::StoreUnavailable` - ストアが応答しない（通知は行われない）
    pub async fn create(
        &self,
        name: TeamName,
        label: Option<String>,
        created_by: IdentityId,
        players: Vec<IdentityId>,
    ) -> Result<Team, TeamError> {
        let _guard = self.locks.lock(&name).await;

        if self.find(&name).await?.is_some() {
            tracing::warn!(team = %name, "team already exists");
            return Err(TeamError::DuplicateTeam(name.to_string()));
        }

        let team = Team::new(name, label, created_by, players);
        self.retry
            .run("create_team", || self.store.create_team(team.clone()))
            .await?;

        let channel = Channel::Team(team.name.clone());
        for player in &team.players {
            self.registry
                .join_channel_by_identity(player, channel.clone())
                .await;
        }

        self.registry
            .deliver(&Recipients::All, &ServerEvent::TeamCreated(TeamCreatedDto::from(&team)))
            .await;
        tracing::info!(team = %team.name, created_by = %team.created_by, "team created");
        Ok(team)
    }

    /// Team を削除し、全接続に `team-deleted` を通知
    ///
    /// 存在しない Team の削除は何もせず `Ok(None)` を返します。
    pub async fn delete(&self, name: &TeamName) -> Result<Option<Team>, TeamError> {
        let _guard = self.locks.lock(name).await;

        let Some(team) = self.find(name).await? else {
            tracing::debug!(team = %name, "delete of unknown team ignored");
            return Ok(None);
        };

        self.retry
            .run("delete_team", || self.store.delete_team(name))
            .await?;

        let released = self
            .registry
            .clear_channel(&Channel::Team(name.clone()))
            .await;
        self.registry
            .deliver(
                &Recipients::All,
                &ServerEvent::TeamDeleted {
                    team_id: name.to_string(),
                },
            )
            .await;
        tracing::info!(team = %name, released = released.len(), "team deleted");
        Ok(Some(team))
    }

    /// Team に参加
    ///
    /// 既存メンバーへ参加者の音声ペイロードを転送し、全接続に
    /// `player-joined-team` を通知します。メンバー一覧が変わった場合は
    /// `update-team` も通知します。既にメンバーである場合の参加は冪等です。
    pub async fn join(
        &self,
        name: &TeamName,
        identity_id: &IdentityId,
        connection_id: &ConnectionId,
        audio_stream: Option<StreamPayload>,
    ) -> Result<Team, TeamError> {
        let _guard = self.locks.lock(name).await;

        let mut team = self
            .find(name)
            .await?
            .ok_or_else(|| TeamError::TeamNotFound(name.to_string()))?;

        let added = team.add_player(identity_id.clone());
        if added {
            team = self.write_players(name, team.players.clone()).await?;
        }

        let channel = Channel::Team(name.clone());
        if let Some(audio_stream) = audio_stream {
            self.registry
                .deliver(
                    &Recipients::ChannelExcept(channel.clone(), connection_id.clone()),
                    &ServerEvent::PlayerJoinedAudio { audio_stream },
                )
                .await;
        }
        self.registry.join_channel(connection_id, channel).await;

        self.registry
            .deliver(
                &Recipients::All,
                &ServerEvent::PlayerJoinedTeam {
                    socket_id: identity_id.to_string(),
                    team_id: name.to_string(),
                },
            )
            .await;
        if added {
            self.registry
                .deliver(&Recipients::All, &ServerEvent::UpdateTeam(TeamDto::from(&team)))
                .await;
        }
        tracing::info!(team = %name, identity = %identity_id, added, "player joined team");
        Ok(team)
    }

    /// Team から離脱
    ///
    /// Team チャンネルに `disconnect-my-audio`、全接続に `player-left-team` を通知し、
    /// メンバー一覧が変わった場合は `update-team` も通知します。
    /// メンバーでもチャンネル参加者でもない場合は何も通知しません。
    pub async fn leave(&self, name: &TeamName, identity_id: &IdentityId) -> Result<Team, TeamError> {
        let _guard = self.locks.lock(name).await;

        let mut team = self
            .find(name)
            .await?
            .ok_or_else(|| TeamError::TeamNotFound(name.to_string()))?;

        let removed = team.remove_player(identity_id);
        if removed {
            team = self.write_players(name, team.players.clone()).await?;
        }

        let channel = Channel::Team(name.clone());
        let unbound = self
            .registry
            .leave_channel_by_identity(identity_id, &channel)
            .await;

        if !removed && !unbound {
            tracing::debug!(team = %name, identity = %identity_id, "leave of non-member ignored");
            return Ok(team);
        }

        self.registry
            .deliver(
                &Recipients::Channel(channel),
                &ServerEvent::DisconnectMyAudio {
                    socket_id: identity_id.to_string(),
                },
            )
            .await;
        self.registry
            .deliver(
                &Recipients::All,
                &ServerEvent::PlayerLeftTeam {
                    socket_id: identity_id.to_string(),
                    team_id: name.to_string(),
                },
            )
            .await;
        if removed {
            self.registry
                .deliver(&Recipients::All, &ServerEvent::UpdateTeam(TeamDto::from(&team)))
                .await;
        }
        tracing::info!(team = %name, identity = %identity_id, removed, "player left team");
        Ok(team)
    }

    /// 作成者とメンバーを丸ごと置き換え、全接続に `update-team` を通知
    ///
    /// チャンネル参加は新しいメンバー一覧に合わせて同期されます。
    pub async fn update(
        &self,
        name: &TeamName,
        created_by: IdentityId,
        players: Vec<IdentityId>,
    ) -> Result<Team, TeamError> {
        let _guard = self.locks.lock(name).await;

        let previous = self
            .find(name)
            .await?
            .ok_or_else(|| TeamError::TeamNotFound(name.to_string()))?;

        let fields = TeamUpdate {
            created_by: Some(created_by),
            players: Some(players),
        };
        let team = self
            .retry
            .run("update_team", || self.store.update_team(name, fields.clone()))
            .await?;

        let channel = Channel::Team(name.clone());
        for player in previous.players.iter().filter(|p| !team.contains(p)) {
            self.registry
                .leave_channel_by_identity(player, &channel)
                .await;
        }
        for player in team.players.iter().filter(|p| !previous.contains(p)) {
            self.registry
                .join_channel_by_identity(player, channel.clone())
                .await;
        }

        self.registry
            .deliver(&Recipients::All, &ServerEvent::UpdateTeam(TeamDto::from(&team)))
            .await;
        tracing::info!(team = %name, players = team.players.len(), "team updated");
        Ok(team)
    }

    /// 全ての Team
    pub async fn list(&self) -> Result<Vec<Team>, TeamError> {
        Ok(self
            .retry
            .run("find_teams", || self.store.find_teams())
            .await?)
    }

    /// 指定したアイデンティティが所属する Team の名前
    pub async fn teams_of(&self, identity_id: &IdentityId) -> Result<Vec<TeamName>, TeamError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|team| team.contains(identity_id))
            .map(|team| team.name)
            .collect())
    }

    async fn find(&self, name: &TeamName) -> Result<Option<Team>, TeamError> {
        Ok(self
            .retry
            .run("find_team", || self.store.find_team(name))
            .await?)
    }

    async fn write_players(
        &self,
        name: &TeamName,
        players: Vec<IdentityId>,
    ) -> Result<Team, TeamError> {
        Ok(self
            .retry
            .run("update_team", || {
                self.store
                    .update_team(name, TeamUpdate::players(players.clone()))
            })
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{IdentityKind, MockPresenceStore, StoreError},
        usecase::test_support::{Harness, SlowStore, connect_as, drain_events, id, team_name},
    };
    use std::{collections::HashSet, time::Duration};

    fn count(events: &[ServerEvent], name: &str) -> usize {
        events.iter().filter(|e| e.name() == name).count()
    }

    #[tokio::test]
    async fn test_create_team_broadcasts_to_all() {
        // テスト項目: Team を作成すると全接続に team-created が1回通知される
        // given (前提条件):
        let harness = Harness::new();
        let (_alice, mut alice_rx) = connect_as(&harness.registry, "alice", IdentityKind::Player).await;
        let (_host, mut host_rx) = connect_as(&harness.registry, "host", IdentityKind::Host).await;

        // when (操作):
        let team = harness
            .teams
            .create(team_name("Alpha"), None, id("host"), vec![id("alice")])
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(team.players, vec![id("alice")]);
        assert_eq!(count(&drain_events(&mut alice_rx), "team-created"), 1);
        assert_eq!(count(&drain_events(&mut host_rx), "team-created"), 1);
        // 初期メンバーは Team チャンネルに参加している
        let members = harness
            .registry
            .channel_members(&Channel::Team(team_name("Alpha")))
            .await;
        assert_eq!(members.len(), 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_team_fails() {
        // テスト項目: 同名の Team を2回作成すると2回目は DuplicateTeam になり、通知は1回だけ
        // given (前提条件):
        let harness = Harness::new();
        let (_alice, mut alice_rx) = connect_as(&harness.registry, "alice", IdentityKind::Player).await;
        harness
            .teams
            .create(team_name("Alpha"), None, id("alice"), vec![])
            .await
            .unwrap();

        // when (操作):
        let result = harness
            .teams
            .create(team_name("Alpha"), None, id("alice"), vec![])
            .await;

        // then (期待する結果):
        assert_eq!(result, Err(TeamError::DuplicateTeam("Alpha".to_string())));
        assert_eq!(count(&drain_events(&mut alice_rx), "team-created"), 1);
    }

    #[tokio::test]
    async fn test_join_forwards_audio_to_existing_members() {
        // テスト項目: 参加時に音声ペイロードが既存メンバーにのみ転送され、参加通知は全接続に届く
        // given (前提条件):
        let harness = Harness::new();
        let (alice, mut alice_rx) = connect_as(&harness.registry, "alice", IdentityKind::Player).await;
        let (bob, mut bob_rx) = connect_as(&harness.registry, "bob", IdentityKind::Player).await;
        let (_carol, mut carol_rx) = connect_as(&harness.registry, "carol", IdentityKind::Player).await;
        harness
            .teams
            .create(team_name("Alpha"), None, id("alice"), vec![])
            .await
            .unwrap();
        harness
            .teams
            .join(&team_name("Alpha"), &id("alice"), &alice, None)
            .await
            .unwrap();
        drain_events(&mut alice_rx);
        drain_events(&mut bob_rx);
        drain_events(&mut carol_rx);

        // when (操作):
        let audio = StreamPayload::Structured(serde_json::json!({"sdp": "bob-offer"}));
        let team = harness
            .teams
            .join(&team_name("Alpha"), &id("bob"), &bob, Some(audio.clone()))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(team.players, vec![id("alice"), id("bob")]);
        let alice_events = drain_events(&mut alice_rx);
        assert!(alice_events.contains(&ServerEvent::PlayerJoinedAudio { audio_stream: audio }));
        assert_eq!(count(&alice_events, "player-joined-team"), 1);
        assert_eq!(count(&alice_events, "update-team"), 1);

        let bob_events = drain_events(&mut bob_rx);
        assert_eq!(count(&bob_events, "player-joined-audio"), 0);

        let carol_events = drain_events(&mut carol_rx);
        assert_eq!(count(&carol_events, "player-joined-audio"), 0);
        assert_eq!(count(&carol_events, "player-joined-team"), 1);
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        // テスト項目: 既にメンバーの参加ではメンバー一覧が変わらず update-team も通知されない
        // given (前提条件):
        let harness = Harness::new();
        let (alice, mut alice_rx) = connect_as(&harness.registry, "alice", IdentityKind::Player).await;
        harness
            .teams
            .create(team_name("Alpha"), None, id("alice"), vec![id("alice")])
            .await
            .unwrap();
        drain_events(&mut alice_rx);

        // when (操作):
        let team = harness
            .teams
            .join(&team_name("Alpha"), &id("alice"), &alice, None)
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(team.players, vec![id("alice")]);
        assert_eq!(count(&drain_events(&mut alice_rx), "update-team"), 0);
    }

    #[tokio::test]
    async fn test_join_unknown_team_fails() {
        // テスト項目: 存在しない Team への参加は TeamNotFound になり、何も通知されない
        // given (前提条件):
        let harness = Harness::new();
        let (alice, mut alice_rx) = connect_as(&harness.registry, "alice", IdentityKind::Player).await;

        // when (操作):
        let result = harness
            .teams
            .join(&team_name("Ghost"), &id("alice"), &alice, None)
            .await;

        // then (期待する結果):
        assert_eq!(result, Err(TeamError::TeamNotFound("Ghost".to_string())));
        assert!(drain_events(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_leave_notifies_team_and_all() {
        // テスト項目: 離脱すると Team に disconnect-my-audio、全接続に player-left-team と update-team が届く
        // given (前提条件):
        let harness = Harness::new();
        let (alice, mut alice_rx) = connect_as(&harness.registry, "alice", IdentityKind::Player).await;
        let (bob, mut bob_rx) = connect_as(&harness.registry, "bob", IdentityKind::Player).await;
        harness
            .teams
            .create(team_name("Alpha"), None, id("alice"), vec![])
            .await
            .unwrap();
        for (conn, who) in [(&alice, "alice"), (&bob, "bob")] {
            harness
                .teams
                .join(&team_name("Alpha"), &id(who), conn, None)
                .await
                .unwrap();
        }
        drain_events(&mut alice_rx);
        drain_events(&mut bob_rx);

        // when (操作):
        let team = harness
            .teams
            .leave(&team_name("Alpha"), &id("bob"))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(team.players, vec![id("alice")]);
        let alice_events = drain_events(&mut alice_rx);
        assert!(alice_events.contains(&ServerEvent::DisconnectMyAudio {
            socket_id: "bob".to_string()
        }));
        assert_eq!(count(&alice_events, "player-left-team"), 1);
        assert_eq!(count(&alice_events, "update-team"), 1);

        let bob_events = drain_events(&mut bob_rx);
        assert_eq!(count(&bob_events, "disconnect-my-audio"), 0);
        assert_eq!(count(&bob_events, "player-left-team"), 1);
    }

    #[tokio::test]
    async fn test_leave_non_member_is_silent() {
        // テスト項目: メンバーでない場合の離脱は何も通知しない
        // given (前提条件):
        let harness = Harness::new();
        let (_alice, mut alice_rx) = connect_as(&harness.registry, "alice", IdentityKind::Player).await;
        harness
            .teams
            .create(team_name("Alpha"), None, id("alice"), vec![])
            .await
            .unwrap();
        drain_events(&mut alice_rx);

        // when (操作):
        let result = harness.teams.leave(&team_name("Alpha"), &id("alice")).await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert!(drain_events(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_update_syncs_channel_membership() {
        // テスト項目: 更新後のメンバー一覧に合わせてチャンネル参加が同期される
        // given (前提条件):
        let harness = Harness::new();
        let (_alice, mut alice_rx) = connect_as(&harness.registry, "alice", IdentityKind::Player).await;
        let (bob, _bob_rx) = connect_as(&harness.registry, "bob", IdentityKind::Player).await;
        harness
            .teams
            .create(team_name("Alpha"), None, id("host"), vec![id("alice")])
            .await
            .unwrap();
        drain_events(&mut alice_rx);

        // when (操作):
        let team = harness
            .teams
            .update(&team_name("Alpha"), id("bob"), vec![id("bob")])
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(team.created_by, id("bob"));
        let members = harness
            .registry
            .channel_members(&Channel::Team(team_name("Alpha")))
            .await;
        assert_eq!(members, vec![bob]);
        assert_eq!(count(&drain_events(&mut alice_rx), "update-team"), 1);
    }

    #[tokio::test]
    async fn test_delete_releases_channel_and_is_idempotent() {
        // テスト項目: 削除で Team チャンネルが解放され、2回目の削除は何もしない
        // given (前提条件):
        let harness = Harness::new();
        let (_alice, mut alice_rx) = connect_as(&harness.registry, "alice", IdentityKind::Player).await;
        harness
            .teams
            .create(team_name("Alpha"), None, id("alice"), vec![id("alice")])
            .await
            .unwrap();
        drain_events(&mut alice_rx);

        // when (操作):
        let first = harness.teams.delete(&team_name("Alpha")).await.unwrap();
        let second = harness.teams.delete(&team_name("Alpha")).await.unwrap();

        // then (期待する結果):
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(
            harness
                .registry
                .channel_members(&Channel::Team(team_name("Alpha")))
                .await
                .is_empty()
        );
        assert_eq!(
            drain_events(&mut alice_rx),
            vec![ServerEvent::TeamDeleted {
                team_id: "Alpha".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_concurrent_joins_and_leaves_are_serialized() {
        // テスト項目: 同一 Team への並行した join / leave で更新が失われない
        // given (前提条件): ストア呼び出しごとに待機が入り、直列化しなければ競合が起きる状態
        let harness = Harness::with_store(Arc::new(SlowStore::new(Duration::from_millis(2))));
        harness
            .teams
            .create(
                team_name("Alpha"),
                None,
                id("host"),
                vec![id("leaver-0"), id("leaver-1"), id("leaver-2")],
            )
            .await
            .unwrap();
        let mut joiners = Vec::new();
        for i in 0..8 {
            let name = format!("joiner-{i}");
            let (conn, rx) = connect_as(&harness.registry, &name, IdentityKind::Player).await;
            joiners.push((name, conn, rx));
        }

        // when (操作):
        let mut handles = Vec::new();
        for (name, conn, _) in &joiners {
            let teams = harness.teams.clone();
            let (name, conn) = (name.clone(), conn.clone());
            handles.push(tokio::spawn(async move {
                teams.join(&team_name("Alpha"), &id(&name), &conn, None).await
            }));
        }
        for i in 0..3 {
            let teams = harness.teams.clone();
            handles.push(tokio::spawn(async move {
                teams
                    .leave(&team_name("Alpha"), &id(&format!("leaver-{i}")))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // then (期待する結果):
        let team = harness.teams.list().await.unwrap().remove(0);
        let players: HashSet<String> = team
            .players
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        let expected: HashSet<String> = (0..8).map(|i| format!("joiner-{i}")).collect();
        assert_eq!(players, expected);
        assert_eq!(team.players.len(), 8);
    }

    #[tokio::test]
    async fn test_store_outage_rejects_without_broadcast() {
        // テスト項目: ストア障害時は StoreUnavailable が返り、何も通知されない
        // given (前提条件):
        let mut store = MockPresenceStore::new();
        store
            .expect_find_team()
            .returning(|_| Err(StoreError::Unavailable("down".to_string())));
        let harness = Harness::with_store(Arc::new(store));
        let (alice, mut alice_rx) = connect_as(&harness.registry, "alice", IdentityKind::Player).await;

        // when (操作):
        let result = harness
            .teams
            .join(&team_name("Alpha"), &id("alice"), &alice, None)
            .await;

        // then (期待する結果):
        assert_eq!(result, Err(TeamError::StoreUnavailable));
        assert!(drain_events(&mut alice_rx).is_empty());
    }
}
