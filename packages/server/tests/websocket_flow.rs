//! WebSocket integration tests.
//!
//! Drive the relay end to end: authentication, team coordination, signaling and departure.

mod fixtures;
use fixtures::{TestServer, connect_ws, expect_event, expect_silence, next_event, send_event};
use serde_json::json;

#[tokio::test]
async fn test_authenticate_with_query_parameters() {
    // テスト項目: クエリパラメータで認証すると connected-as と connected-init が届く
    // given (前提条件):
    let port = 19090;
    let server = TestServer::start(port);

    // when (操作):
    let mut ws = connect_ws(&server.ws_url("identityId=host&roomCode=party&kind=host")).await;

    // then (期待する結果):
    let connected_as = next_event(&mut ws).await.unwrap();
    assert_eq!(connected_as, json!({"type": "connected-as", "role": "host"}));

    let init = next_event(&mut ws).await.unwrap();
    assert_eq!(init["type"], "connected-init");
    assert_eq!(init["users"], json!([]));
    assert_eq!(init["teams"], json!([]));
    assert_eq!(init["eventSettings"]["signalTimeoutMs"], 5000);
}

#[tokio::test]
async fn test_unknown_room_closes_connection() {
    // テスト項目: 存在しないルームでの認証は connect-error の後に接続が閉じられる
    // given (前提条件):
    let port = 19091;
    let server = TestServer::start(port);
    let mut ws = connect_ws(&server.ws_url("")).await;

    // when (操作):
    send_event(
        &mut ws,
        json!({"type": "authenticate", "identityId": "alice", "roomCode": "nowhere", "kind": "player"}),
    )
    .await;

    // then (期待する結果):
    let error = next_event(&mut ws).await.unwrap();
    assert_eq!(error["type"], "connect-error");
    assert_eq!(error["code"], "room-not-found");
    assert!(next_event(&mut ws).await.is_none());
}

#[tokio::test]
async fn test_team_flow_and_departure() {
    // テスト項目: Team 作成・参加の後に切断すると、離脱通知と update-team が1回ずつ届く
    // given (前提条件):
    let port = 19092;
    let server = TestServer::start(port);
    let mut host = connect_ws(&server.ws_url("identityId=host&roomCode=party&kind=host")).await;
    expect_event(&mut host, "connected-init").await;
    let mut alice = connect_ws(&server.ws_url("")).await;
    send_event(
        &mut alice,
        json!({"type": "authenticate", "identityId": "alice", "roomCode": "party", "kind": "player"}),
    )
    .await;
    let init = expect_event(&mut alice, "connected-init").await;
    assert_eq!(init["users"][0]["id"], "host");
    let added = expect_event(&mut host, "add-user").await;
    assert_eq!(added["id"], "alice");

    send_event(
        &mut host,
        json!({"type": "submit-add-team", "name": "Bravo", "players": []}),
    )
    .await;
    expect_event(&mut host, "team-created").await;
    expect_event(&mut alice, "team-created").await;

    send_event(&mut alice, json!({"type": "join-team", "teamUUID": "Bravo"})).await;
    let joined = expect_event(&mut host, "player-joined-team").await;
    assert_eq!(joined, json!({"type": "player-joined-team", "socketID": "alice", "teamID": "Bravo"}));
    let updated = expect_event(&mut host, "update-team").await;
    assert_eq!(updated["players"], json!(["alice"]));

    // when (操作):
    drop(alice);

    // then (期待する結果):
    let disconnected = expect_event(&mut host, "user-disconnected").await;
    assert_eq!(disconnected["socketID"], "alice");
    let deleted = expect_event(&mut host, "delete-user").await;
    assert_eq!(deleted["id"], "alice");
    let left = expect_event(&mut host, "player-left-team").await;
    assert_eq!(left["teamID"], "Bravo");
    let updated = expect_event(&mut host, "update-team").await;
    assert_eq!(updated["players"], json!([]));
    expect_silence(&mut host).await;
}

#[tokio::test]
async fn test_direct_audio_reaches_only_target() {
    // テスト項目: send-player-audio は宛先にのみ届き、ペイロードは変更されない
    // given (前提条件):
    let port = 19093;
    let server = TestServer::start(port);
    let mut alice = connect_ws(&server.ws_url("identityId=alice&roomCode=party&kind=player")).await;
    expect_event(&mut alice, "connected-init").await;
    let mut bob = connect_ws(&server.ws_url("identityId=bob&roomCode=party&kind=player")).await;
    expect_event(&mut bob, "connected-init").await;
    let mut carol = connect_ws(&server.ws_url("identityId=carol&roomCode=party&kind=player")).await;
    expect_event(&mut carol, "connected-init").await;
    expect_event(&mut alice, "add-user").await;
    expect_event(&mut alice, "add-user").await;
    expect_event(&mut bob, "add-user").await;

    // when (操作):
    send_event(
        &mut alice,
        json!({
            "type": "send-player-audio",
            "targetId": "bob",
            "audioStream": {"kind": "binary", "data": [1, 2, 3]}
        }),
    )
    .await;

    // then (期待する結果):
    let audio = expect_event(&mut bob, "join-my-audio").await;
    assert_eq!(audio["audioStream"], json!({"kind": "binary", "data": [1, 2, 3]}));
    expect_silence(&mut carol).await;
    expect_silence(&mut alice).await;
}

#[tokio::test]
async fn test_reconnect_supersedes_previous_connection() {
    // テスト項目: 同じアイデンティティで再接続すると旧接続が閉じられ、離脱通知は送られない
    // given (前提条件):
    let port = 19094;
    let server = TestServer::start(port);
    let mut host = connect_ws(&server.ws_url("identityId=host&roomCode=party&kind=host")).await;
    expect_event(&mut host, "connected-init").await;
    let mut first = connect_ws(&server.ws_url("identityId=alice&roomCode=party&kind=player")).await;
    expect_event(&mut first, "connected-init").await;
    expect_event(&mut host, "add-user").await;

    // when (操作):
    let mut second = connect_ws(&server.ws_url("identityId=alice&roomCode=party&kind=player")).await;

    // then (期待する結果):
    expect_event(&mut second, "connected-init").await;
    assert!(next_event(&mut first).await.is_none());
    let added = expect_event(&mut host, "add-user").await;
    assert_eq!(added["id"], "alice");
    expect_silence(&mut host).await;
}
