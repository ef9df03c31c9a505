//! UseCase: シグナリングの中継
//!
//! ミュート・アンミュート・音声ストリームのイベントを、内容を解釈せずに宛先へ転送します。
//! 永続化は行いません。
//!
//! 送信者ごとのイベント順序は、接続ごとに受信メッセージを逐次処理することと、
//! レジストリが単一ロックの内側で各接続の送信キューに積むことで保たれます。

use std::sync::Arc;

use serde_json::Value;

use crate::{
    domain::{ConnectionId, IdentityKind, TeamName},
    infrastructure::{
        dto::websocket::{ServerEvent, StreamPayload},
        registry::{BoundIdentity, Channel, ConnectionRegistry, Recipients},
    },
};

/// シグナリング中継
pub struct SignalingRelay {
    registry: Arc<ConnectionRegistry>,
}

impl SignalingRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// 音声ペイロードを1つの宛先（アイデンティティ ID または接続 ID）にのみ転送
    ///
    /// # Returns
    ///
    /// 配信した接続数。宛先が解決できない場合は 0
    pub async fn send_player_audio(&self, target: &str, audio_stream: StreamPayload) -> usize {
        self.direct(target, ServerEvent::JoinMyAudio { audio_stream })
            .await
    }

    /// ホストからの個別アンミュートを1つの宛先に転送
    pub async fn host_unmute(&self, sender: &BoundIdentity, target: &str, host_id: String) -> usize {
        if !Self::is_host(sender, "host-unmute") {
            return 0;
        }
        self.direct(
            target,
            ServerEvent::HostUnmute {
                host_unmute: host_id,
            },
        )
        .await
    }

    /// ホストのアンミュートを Team のメンバー（送信者を除く）に転送
    pub async fn unmute_host_team(
        &self,
        sender: &BoundIdentity,
        connection_id: &ConnectionId,
        team: TeamName,
    ) -> usize {
        if !Self::is_host(sender, "unmute-host-team") {
            return 0;
        }
        self.registry
            .deliver(
                &Recipients::ChannelExcept(Channel::Team(team), connection_id.clone()),
                &ServerEvent::UnmuteMe {
                    socket_id: sender.id.to_string(),
                },
            )
            .await
    }

    /// ホストのアンミュートを送信者以外の全接続に転送
    pub async fn unmute_host_all(&self, sender: &BoundIdentity, connection_id: &ConnectionId) -> usize {
        if !Self::is_host(sender, "unmute-host-all") {
            return 0;
        }
        self.registry
            .deliver(
                &Recipients::AllExcept(connection_id.clone()),
                &ServerEvent::UnmuteMe {
                    socket_id: sender.id.to_string(),
                },
            )
            .await
    }

    /// ホストのミュートを送信者以外の全接続に転送
    pub async fn mute_host(&self, sender: &BoundIdentity, connection_id: &ConnectionId) -> usize {
        if !Self::is_host(sender, "mute-host") {
            return 0;
        }
        self.registry
            .deliver(
                &Recipients::AllExcept(connection_id.clone()),
                &ServerEvent::MuteMe {
                    socket_id: sender.id.to_string(),
                },
            )
            .await
    }

    /// リモートミュート状態の変更を送信者以外の全接続に転送
    pub async fn change_remote_mute(&self, connection_id: &ConnectionId, remote_mute: bool) -> usize {
        self.registry
            .deliver(
                &Recipients::AllExcept(connection_id.clone()),
                &ServerEvent::ChangeRemoteMute { remote_mute },
            )
            .await
    }

    /// ホストチャンネルへの私信
    pub async fn message_host(&self, sender: &BoundIdentity, msg: Value) -> usize {
        self.registry
            .deliver(
                &Recipients::Channel(Channel::Host),
                &ServerEvent::PrivateMessage {
                    socket_id: sender.id.to_string(),
                    msg,
                },
            )
            .await
    }

    async fn direct(&self, target: &str, event: ServerEvent) -> usize {
        let Some(recipients) = self.registry.resolve_target(target).await else {
            tracing::debug!(target, event = event.name(), "relay target is not connected");
            return 0;
        };
        self.registry.deliver(&recipients, &event).await
    }

    fn is_host(sender: &BoundIdentity, event: &str) -> bool {
        if sender.kind == IdentityKind::Host {
            return true;
        }
        tracing::warn!(identity = %sender.id, event, "host-only event from a player ignored");
        false
    }
}
