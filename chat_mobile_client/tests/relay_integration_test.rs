// chat_mobile_client/tests/relay_integration_test.rs

//! 真实套接字上的端到端测试：`SessionController` + `WsConnector` 对接本地回环房间服务器。

use chat_mobile_client::{ClientConfig, ConnectHandlers, ConnectionStatus, SessionController};
use chat_models::enums::ConnectionState;
use chat_models::ws_payloads::{ChatMessagePayload, NEW_MESSAGE_TYPE};
use chat_websocket_utils::client::WsConnector;
use chat_websocket_utils::message::Envelope;
use chat_websocket_utils::server::{start_room_relay, RelayOptions};
use log::{info, LevelFilter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn init_test_logger() {
    let _ = env_logger::builder().filter_level(LevelFilter::Info).is_test(true).try_init();
}

fn config_for(addr: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.ws_url = format!("ws://{}/ws", addr);
    config.reconnect.jitter_max_ms = 0;
    config
}

async fn wait_status<F>(controller: &SessionController, predicate: F) -> ConnectionStatus
where
    F: FnMut(&ConnectionStatus) -> bool,
{
    let mut status = controller.status();
    let snapshot = tokio::time::timeout(Duration::from_secs(10), status.wait_for(predicate))
        .await
        .expect("等待连接状态超时 (超过10秒)")
        .expect("状态通道已关闭")
        .clone();
    snapshot
}

async fn next_envelope(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("等待服务器消息超时 (超过5秒)")
        .expect("消息通道已关闭")
}

#[tokio::test]
/// 连接、收发、切换房间与断开的完整流程。
async fn test_chat_round_trip_and_room_switch() {
    init_test_logger();
    let (addr, relay, server) = start_room_relay("127.0.0.1:0", RelayOptions::default())
        .await
        .expect("启动房间服务器失败");

    let controller = SessionController::new(config_for(addr), Arc::new(WsConnector::new()));
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    controller.add_message_handler(move |envelope| {
        let _ = inbound_tx.send(envelope.clone());
        Ok(())
    });

    controller.connect("room-a", "token-1", ConnectHandlers::new()).expect("connect 失败");
    wait_status(&controller, |s| s.state == ConnectionState::Open).await;
    assert_eq!(relay.peer_count("room-a"), 1);

    assert!(controller.send_chat_message("hello a").await, "打开后发送应被接受");
    let echoed = next_envelope(&mut inbound_rx).await;
    assert_eq!(echoed.message_type, NEW_MESSAGE_TYPE);
    assert_eq!(echoed.room_id.as_deref(), Some("room-a"));
    let payload: ChatMessagePayload = echoed.data_as().expect("载荷反序列化失败");
    assert_eq!(payload.content, "hello a");
    info!("[Test Main] 房间 room-a 收发验证通过");

    controller.connect("room-b", "token-1", ConnectHandlers::new()).expect("connect 失败");
    wait_status(&controller, |s| s.state == ConnectionState::Open && s.room_id.as_deref() == Some("room-b")).await;

    // 服务端广播到旧房间的消息不应再到达。
    relay.broadcast("room-a", &Envelope::raw(NEW_MESSAGE_TYPE, serde_json::json!({ "content": "stale" })));
    assert!(controller.send_chat_message("hello b").await);
    let echoed = next_envelope(&mut inbound_rx).await;
    assert_eq!(echoed.room_id.as_deref(), Some("room-b"));
    let payload: ChatMessagePayload = echoed.data_as().expect("载荷反序列化失败");
    assert_eq!(payload.content, "hello b");
    assert_eq!(relay.peer_count("room-b"), 1);

    controller.disconnect().await.expect("disconnect 失败");
    assert_eq!(controller.state(), ConnectionState::Idle);
    assert_eq!(controller.current_room(), None);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(relay.peer_count("room-a"), 0);
    assert_eq!(relay.peer_count("room-b"), 0);
    server.abort();
}

#[tokio::test]
/// 服务端不应答心跳时，客户端判定连接不健康并开始重连。
async fn test_unanswered_heartbeats_trigger_reconnect() {
    init_test_logger();
    let options = RelayOptions { ack_heartbeats: false, ..RelayOptions::default() };
    let (addr, _relay, server) = start_room_relay("127.0.0.1:0", options).await.expect("启动房间服务器失败");

    let mut config = config_for(addr);
    config.heartbeat.interval_ms = 200;
    config.heartbeat.response_timeout_ms = 100;
    config.heartbeat.max_missed = 2;
    config.reconnect.base_delay_ms = 100;
    config.reconnect.max_delay_ms = 500;
    config.validate().expect("测试配置无效");

    let controller = SessionController::new(config, Arc::new(WsConnector::new()));
    controller.connect("room-hb", "token-1", ConnectHandlers::new()).expect("connect 失败");
    wait_status(&controller, |s| s.state == ConnectionState::Open).await;

    let status = wait_status(&controller, |s| s.reconnect_attempt >= 1).await;
    assert!(status.last_error.is_some(), "健康检查失败应记录错误");
    assert_eq!(status.room_id.as_deref(), Some("room-hb"));

    // 服务器仍在，重连应能再次打开通道。
    wait_status(&controller, |s| s.state == ConnectionState::Open).await;
    controller.disconnect().await.expect("disconnect 失败");
    server.abort();
}
