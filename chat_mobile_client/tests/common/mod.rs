// chat_mobile_client/tests/common/mod.rs

//! 会话控制器测试共用的脚本化 `Connector`。
//!
//! `MockConnector::open` 不建立任何网络连接，而是把一个 `MockChannel` 交给测试，
//! 由测试决定何时“打开”、推送消息、应答心跳或关闭通道。

#![allow(dead_code)]

use chat_mobile_client::{ClientConfig, ConnectionStatus, SessionController};
use chat_models::enums::ConnectionState;
use chat_models::ws_payloads::HEARTBEAT_TYPE;
use chat_websocket_utils::client::{Channel, ChannelEvent, ChannelEventKind, ChannelEventSender, ChannelId, Connector};
use chat_websocket_utils::message::Envelope;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

pub fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 默认配置，但去掉重连抖动，便于断言时间。
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.ws_url = "ws://chat.test/ws".to_string();
    config.reconnect.jitter_max_ms = 0;
    config
}

/// 让所有就绪任务运行到空闲。暂停时钟下只推进 1 ms。
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[derive(Default)]
struct ConnectorStats {
    open_now: AtomicUsize,
    max_open: AtomicUsize,
    opened_total: AtomicUsize,
}

pub struct MockConnector {
    stats: Arc<ConnectorStats>,
    opened_tx: mpsc::UnboundedSender<MockChannel>,
}

impl Connector for MockConnector {
    fn open(&self, url: Url, channel_id: ChannelId, events: ChannelEventSender) -> Box<dyn Channel> {
        self.stats.opened_total.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::new(ChannelShared::default());
        let _ = self.opened_tx.send(MockChannel {
            id: channel_id,
            url,
            events: events.clone(),
            shared: shared.clone(),
            stats: self.stats.clone(),
        });
        Box::new(MockChannelHandle { id: channel_id, events, shared, stats: self.stats.clone() })
    }
}

#[derive(Default)]
struct ChannelShared {
    open: AtomicBool,
    rejecting_sends: AtomicBool,
    auto_close: AtomicBool,
    sent: Mutex<Vec<Envelope>>,
    close_requests: Mutex<Vec<(u16, String)>>,
}

impl ChannelShared {
    fn mark_closed(&self, stats: &ConnectorStats) {
        if self.open.swap(false, Ordering::SeqCst) {
            stats.open_now.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// 交给控制器持有的一端。
struct MockChannelHandle {
    id: ChannelId,
    events: ChannelEventSender,
    shared: Arc<ChannelShared>,
    stats: Arc<ConnectorStats>,
}

impl Channel for MockChannelHandle {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn send(&self, envelope: &Envelope) -> bool {
        if !self.shared.open.load(Ordering::SeqCst) || self.shared.rejecting_sends.load(Ordering::SeqCst) {
            return false;
        }
        if let Ok(mut sent) = self.shared.sent.lock() {
            sent.push(envelope.clone());
        }
        true
    }

    fn close(&self, code: u16, reason: &str) {
        if let Ok(mut requests) = self.shared.close_requests.lock() {
            requests.push((code, reason.to_string()));
        }
        self.shared.mark_closed(&self.stats);
        if self.shared.auto_close.load(Ordering::SeqCst) {
            let _ = self.events.send(ChannelEvent {
                channel_id: self.id,
                kind: ChannelEventKind::Closed { code: Some(code), reason: reason.to_string() },
            });
        }
    }
}

impl Drop for MockChannelHandle {
    fn drop(&mut self) {
        self.shared.mark_closed(&self.stats);
    }
}

/// 测试持有的一端，用于驱动通道事件并检查控制器的发送行为。
#[derive(Clone)]
pub struct MockChannel {
    pub id: ChannelId,
    pub url: Url,
    events: ChannelEventSender,
    shared: Arc<ChannelShared>,
    stats: Arc<ConnectorStats>,
}

impl MockChannel {
    fn emit(&self, kind: ChannelEventKind) {
        let _ = self.events.send(ChannelEvent { channel_id: self.id, kind });
    }

    pub fn emit_open(&self) {
        if !self.shared.open.swap(true, Ordering::SeqCst) {
            let now = self.stats.open_now.fetch_add(1, Ordering::SeqCst) + 1;
            self.stats.max_open.fetch_max(now, Ordering::SeqCst);
        }
        self.emit(ChannelEventKind::Opened);
    }

    pub fn emit_message(&self, envelope: Envelope) {
        self.emit(ChannelEventKind::Message(envelope));
    }

    pub fn emit_ack(&self) {
        self.emit(ChannelEventKind::HeartbeatAck);
    }

    pub fn emit_error(&self, info: &str) {
        self.emit(ChannelEventKind::Error(info.to_string()));
    }

    pub fn emit_closed(&self, code: Option<u16>, reason: &str) {
        self.shared.mark_closed(&self.stats);
        self.emit(ChannelEventKind::Closed { code, reason: reason.to_string() });
    }

    /// 控制器请求关闭时立即回报 `Closed`，模拟服务端及时完成关闭握手。
    pub fn set_auto_close(&self, enabled: bool) {
        self.shared.auto_close.store(enabled, Ordering::SeqCst);
    }

    pub fn set_rejecting_sends(&self, rejecting: bool) {
        self.shared.rejecting_sends.store(rejecting, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.shared.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// 除心跳探测以外的已发送消息。
    pub fn sent_application(&self) -> Vec<Envelope> {
        self.sent().into_iter().filter(|e| e.message_type != HEARTBEAT_TYPE).collect()
    }

    pub fn heartbeats_sent(&self) -> usize {
        self.sent().iter().filter(|e| e.message_type == HEARTBEAT_TYPE).count()
    }

    pub fn close_requests(&self) -> Vec<(u16, String)> {
        self.shared.close_requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn query_param(&self, key: &str) -> Option<String> {
        self.url.query_pairs().find(|(k, _)| k == key).map(|(_, v)| v.into_owned())
    }
}

/// 控制器 + 脚本化连接器。
pub struct Harness {
    pub controller: SessionController,
    stats: Arc<ConnectorStats>,
    opened_rx: mpsc::UnboundedReceiver<MockChannel>,
}

impl Harness {
    pub fn new(config: ClientConfig) -> Self {
        init_test_logger();
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(ConnectorStats::default());
        let connector = MockConnector { stats: stats.clone(), opened_tx };
        let controller = SessionController::new(config, Arc::new(connector));
        Harness { controller, stats, opened_rx }
    }

    /// 等待控制器打开下一条通道。
    pub async fn next_channel(&mut self) -> MockChannel {
        tokio::time::timeout(Duration::from_secs(600), self.opened_rx.recv())
            .await
            .expect("等待控制器打开通道超时")
            .expect("连接器已被释放")
    }

    /// 断言到目前为止没有新的通道被打开。
    pub fn assert_no_new_channel(&mut self) {
        if let Ok(channel) = self.opened_rx.try_recv() {
            panic!("不应打开新的通道，实际打开了 {} ({})", channel.id, channel.url);
        }
    }

    pub fn max_concurrently_open(&self) -> usize {
        self.stats.max_open.load(Ordering::SeqCst)
    }

    pub fn total_opened(&self) -> usize {
        self.stats.opened_total.load(Ordering::SeqCst)
    }

    pub async fn wait_for<F>(&self, predicate: F) -> ConnectionStatus
    where
        F: FnMut(&ConnectionStatus) -> bool,
    {
        let mut status = self.controller.status();
        let snapshot = tokio::time::timeout(Duration::from_secs(600), status.wait_for(predicate))
            .await
            .expect("等待状态超时")
            .expect("状态通道已关闭")
            .clone();
        snapshot
    }

    pub async fn wait_state(&self, state: ConnectionState) -> ConnectionStatus {
        self.wait_for(|status| status.state == state).await
    }

    /// 连接到房间并把第一条通道推进到打开状态。
    pub async fn connect_open(&mut self, room_id: &str, token: &str) -> MockChannel {
        self.controller
            .connect(room_id, token, Default::default())
            .expect("控制器不应已停止");
        let channel = self.next_channel().await;
        channel.emit_open();
        self.wait_state(ConnectionState::Open).await;
        channel
    }
}
