// chat_websocket_utils/src/server/transport.rs

//! 包含服务端 WebSocket 监听、接受连接和房间转发逻辑。

use crate::client::transport::{ROOM_QUERY_PARAM, TOKEN_QUERY_PARAM};
use crate::error::WsError;
use crate::message::{preview, Envelope};
use chat_models::ws_payloads::{CHAT_MESSAGE_TYPE, HEARTBEAT_TYPE, NEW_MESSAGE_TYPE};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

/// `WsStream` 是一个类型别名，代表经过 WebSocket 握手后的 TCP 流。
pub type WsStream = WebSocketStream<TcpStream>;

/// 策略违规关闭码，用于拒绝缺少凭证或房间的连接。
pub const POLICY_VIOLATION: u16 = 1008;

/// 握手请求中与聊天相关的信息。
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRequest {
    pub peer_addr: SocketAddr,
    pub token: Option<String>,
    pub room_id: Option<String>,
}

impl ConnectionRequest {
    /// 从握手请求的查询串中提取 `token` 与 `chatroom_id`，空值视为缺失。
    pub fn from_query(peer_addr: SocketAddr, query: Option<&str>) -> Self {
        let mut token = None;
        let mut room_id = None;
        if let Some(query) = query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                if value.is_empty() {
                    continue;
                }
                if key == TOKEN_QUERY_PARAM {
                    token = Some(value.into_owned());
                } else if key == ROOM_QUERY_PARAM {
                    room_id = Some(value.into_owned());
                }
            }
        }
        ConnectionRequest { peer_addr, token, room_id }
    }
}

/// `ServerTransport` 负责 WebSocket 服务端的监听和连接接受。
pub struct ServerTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ServerTransport {
    /// 绑定监听地址。传入端口 0 时由系统分配端口，可通过 `local_addr` 取得实际地址。
    pub async fn bind(addr: &str) -> Result<Self, WsError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("[房间服务器] WebSocket 服务器正在监听地址: {}", local_addr);
        Ok(ServerTransport { listener, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 持续接受连接。每个连接在独立的 Tokio 任务中完成握手，随后调用 `on_connect`。
    ///
    /// 单个连接的握手失败只记录日志，不影响监听循环。
    pub async fn serve<F, Fut>(self, on_connect: F) -> Result<(), WsError>
    where
        F: Fn(WsStream, ConnectionRequest) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    debug!("[房间服务器] 从 {} 接受了新的 TCP 连接", peer_addr);
                    let on_connect_callback = on_connect.clone();
                    tokio::spawn(async move {
                        let mut query: Option<String> = None;
                        let capture_query = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                            query = request.uri().query().map(str::to_owned);
                            Ok(response)
                        };
                        let handshake = accept_hdr_async(tcp_stream, capture_query).await;
                        match handshake {
                            Ok(ws_stream) => {
                                let request = ConnectionRequest::from_query(peer_addr, query.as_deref());
                                info!(
                                    "[房间服务器] 与 {} 的 WebSocket 握手成功 (房间: {:?})",
                                    peer_addr, request.room_id
                                );
                                on_connect_callback(ws_stream, request).await;
                            }
                            Err(e) => {
                                error!("[房间服务器] 与 {} 的 WebSocket 握手失败: {}", peer_addr, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("[房间服务器] 接受 TCP 连接失败: {}。服务器将继续运行。", e);
                }
            }
        }
    }
}

/// 房间转发服务器的行为开关。
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// 是否应答 `heartbeat`。关闭后可用于模拟心跳超时。
    pub ack_heartbeats: bool,
    /// 是否拒绝缺少 `token` 的连接。
    pub require_token: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        RelayOptions { ack_heartbeats: true, require_token: true }
    }
}

struct Peer {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

struct RelayInner {
    options: RelayOptions,
    rooms: Mutex<HashMap<String, Vec<Peer>>>,
    next_peer_id: AtomicU64,
}

/// 按房间转发消息的回环服务器状态。
#[derive(Clone)]
pub struct RoomRelay {
    inner: Arc<RelayInner>,
}

impl RoomRelay {
    pub fn new(options: RelayOptions) -> Self {
        RoomRelay {
            inner: Arc::new(RelayInner {
                options,
                rooms: Mutex::new(HashMap::new()),
                next_peer_id: AtomicU64::new(1),
            }),
        }
    }

    /// 指定房间当前的连接数。
    pub fn peer_count(&self, room_id: &str) -> usize {
        match self.inner.rooms.lock() {
            Ok(rooms) => rooms.get(room_id).map_or(0, Vec::len),
            Err(_) => 0,
        }
    }

    /// 向房间内所有连接推送一条消息，返回成功投递的连接数。
    pub fn broadcast(&self, room_id: &str, envelope: &Envelope) -> usize {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("[房间服务器] 广播消息序列化失败: {}", e);
                return 0;
            }
        };
        let rooms = match self.inner.rooms.lock() {
            Ok(rooms) => rooms,
            Err(_) => return 0,
        };
        rooms
            .get(room_id)
            .map(|peers| peers.iter().filter(|peer| peer.tx.send(Message::Text(text.clone())).is_ok()).count())
            .unwrap_or(0)
    }

    /// 处理一条已完成握手的连接，直到对端断开。
    pub async fn handle(&self, mut ws_stream: WsStream, request: ConnectionRequest) {
        let room_id = match (&request.room_id, &request.token) {
            (Some(room_id), Some(_)) => room_id.clone(),
            (Some(room_id), None) if !self.inner.options.require_token => room_id.clone(),
            _ => {
                warn!("[房间服务器] 拒绝来自 {} 的连接：缺少 token 或 chatroom_id", request.peer_addr);
                let frame = CloseFrame {
                    code: CloseCode::from(POLICY_VIOLATION),
                    reason: Cow::Borrowed("missing token or chatroom_id"),
                };
                let _ = ws_stream.close(Some(frame)).await;
                return;
            }
        };

        let peer_id = self.inner.next_peer_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.register(&room_id, Peer { id: peer_id, tx: tx.clone() });

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if ws_sender.send(message).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        while let Some(frame) = ws_receiver.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(frame)) => {
                    debug!("[房间服务器] 连接 #{} 收到 Close 帧: {:?}", peer_id, frame);
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!("[房间服务器] 连接 #{} 读取失败: {}", peer_id, e);
                    break;
                }
            };
            let envelope = match Envelope::from_json(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("[房间服务器] 连接 #{} 发送了无法解析的帧: {}", peer_id, e);
                    continue;
                }
            };
            match envelope.message_type.as_str() {
                HEARTBEAT_TYPE => {
                    if self.inner.options.ack_heartbeats {
                        if let Ok(ack) = Envelope::heartbeat_ack().to_json() {
                            let _ = tx.send(Message::Text(ack));
                        }
                    } else {
                        debug!("[房间服务器] 已配置为不应答心跳，忽略连接 #{} 的心跳", peer_id);
                    }
                }
                CHAT_MESSAGE_TYPE => {
                    let mut relayed = envelope;
                    relayed.message_type = NEW_MESSAGE_TYPE.to_string();
                    relayed.room_id = Some(room_id.clone());
                    debug!("[房间服务器] 房间 {} 转发聊天消息: {}", room_id, preview(&text));
                    self.broadcast(&room_id, &relayed);
                }
                _ => {
                    let mut relayed = envelope;
                    relayed.room_id = Some(room_id.clone());
                    self.broadcast(&room_id, &relayed);
                }
            }
        }

        self.unregister(&room_id, peer_id);
        drop(tx);
        let _ = writer.await;
        info!("[房间服务器] 连接 #{} 已离开房间 {}", peer_id, room_id);
    }

    fn register(&self, room_id: &str, peer: Peer) {
        if let Ok(mut rooms) = self.inner.rooms.lock() {
            info!("[房间服务器] 连接 #{} 加入房间 {}", peer.id, room_id);
            rooms.entry(room_id.to_string()).or_default().push(peer);
        }
    }

    fn unregister(&self, room_id: &str, peer_id: u64) {
        if let Ok(mut rooms) = self.inner.rooms.lock() {
            if let Some(peers) = rooms.get_mut(room_id) {
                peers.retain(|peer| peer.id != peer_id);
                if peers.is_empty() {
                    rooms.remove(room_id);
                }
            }
        }
    }
}

/// 在 `addr` 上启动一个回环房间服务器，返回实际监听地址、服务器状态与后台任务句柄。
pub async fn start_room_relay(
    addr: &str,
    options: RelayOptions,
) -> Result<(SocketAddr, RoomRelay, JoinHandle<()>), WsError> {
    let transport = ServerTransport::bind(addr).await?;
    let local_addr = transport.local_addr();
    let relay = RoomRelay::new(options);
    let serving = relay.clone();
    let handle = tokio::spawn(async move {
        let on_connect = move |ws_stream: WsStream, request: ConnectionRequest| {
            let relay = serving.clone();
            async move { relay.handle(ws_stream, request).await }
        };
        if let Err(e) = transport.serve(on_connect).await {
            error!("[房间服务器] 服务循环异常退出: {}", e);
        }
    });
    Ok((local_addr, relay, handle))
}
