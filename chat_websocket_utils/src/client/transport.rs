// chat_websocket_utils/src/client/transport.rs

//! 客户端通道传输层核心逻辑。
//!
//! 每一次连接尝试对应一条通道（`Channel`），由 `Connector::open` 创建。
//! `WsConnector` 为每条通道派生一个独立的 Tokio 任务，该任务负责：
//! 1. 通过 `tokio-tungstenite` 建立连接；
//! 2. 将入站帧解码为 `Envelope` 并以 `ChannelEvent` 形式上报；
//! 3. 把调用方经 `Channel::send` / `Channel::close` 投递的出站指令写入套接字。
//!
//! 二进制帧会先按 UTF-8 解码再做 JSON 解析；无法解码的帧只记录日志并丢弃，不会导致通道关闭。
//! `heartbeat_ack` 消息以及 WebSocket `Pong` 控制帧在此层被拦截为 `HeartbeatAck` 事件，
//! 不会进入订阅者的消息分发。

use crate::error::WsError;
use crate::message::{preview, Envelope};
use chat_models::ws_payloads::{HEARTBEAT_ACK_TYPE, PONG_TYPE};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::frame::coding::CloseCode,
    tungstenite::protocol::{CloseFrame, Message},
    tungstenite::Error as TungsteniteError,
};
use url::Url;

/// 正常关闭的 WebSocket 关闭码。
pub const NORMAL_CLOSURE: u16 = 1000;

/// 主动关闭后等待服务端回复 Close 帧的最长时间。
pub const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// 连接 URL 上携带凭证的查询参数名。
pub const TOKEN_QUERY_PARAM: &str = "token";
/// 连接 URL 上携带房间 ID 的查询参数名。
pub const ROOM_QUERY_PARAM: &str = "chatroom_id";

/// 通道标识。每次连接尝试分配一个新的、单调递增的 ID。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

/// 通道上报的事件类型。
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEventKind {
    /// 握手成功，通道已可发送。
    Opened,
    /// 收到一条应用层消息（已排除心跳应答）。
    Message(Envelope),
    /// 收到心跳应答（`heartbeat_ack` / `pong` 消息或 `Pong` 控制帧）。
    HeartbeatAck,
    /// 通道已关闭。`code` 为 `None` 表示没有收到关闭帧（连接异常中断或建立失败）。
    Closed { code: Option<u16>, reason: String },
    /// 连接层错误的描述，随后总会跟一个 `Closed` 事件。
    Error(String),
}

/// 带通道标识的事件。
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel_id: ChannelId,
    pub kind: ChannelEventKind,
}

pub type ChannelEventSender = mpsc::UnboundedSender<ChannelEvent>;

/// 一条已创建的通道。
///
/// 丢弃 `Channel` 会静默关闭底层连接，此后不会再有任何事件上报。
pub trait Channel: Send {
    fn id(&self) -> ChannelId;

    /// 发送一条消息。通道尚未打开或已关闭时返回 `false`。
    fn send(&self, envelope: &Envelope) -> bool;

    /// 请求以指定关闭码关闭通道，完成后上报 `Closed` 事件。
    fn close(&self, code: u16, reason: &str);
}

/// 通道工厂。
pub trait Connector: Send + Sync {
    /// 针对 `url` 发起一次连接尝试，事件经 `events` 上报。
    fn open(&self, url: Url, channel_id: ChannelId, events: ChannelEventSender) -> Box<dyn Channel>;
}

/// 以基础 URL 拼装房间连接 URL，附加 `token` 与 `chatroom_id` 两个必需的查询参数。
///
/// 基础 URL 上已有的同名参数会被替换，其它参数保持不变。
pub fn build_room_url(base: &str, token: &str, room_id: &str) -> Result<Url, WsError> {
    let mut url =
        Url::parse(base).map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", base, e)))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(WsError::InvalidUrl(format!(
                "WebSocket URL '{}' 的协议必须是 ws 或 wss，实际为 '{}'",
                base, other
            )));
        }
    }
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != TOKEN_QUERY_PARAM && key != ROOM_QUERY_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained.iter())
        .append_pair(TOKEN_QUERY_PARAM, token)
        .append_pair(ROOM_QUERY_PARAM, room_id);
    Ok(url)
}

/// 单个入站帧的解码结果。
#[derive(Debug)]
pub enum DecodedFrame {
    Envelope(Envelope),
    HeartbeatAck,
    Close { code: Option<u16>, reason: String },
    /// Ping 等由底层库自动处理的控制帧。
    Skip,
    /// 无法解码的帧，调用方记录日志后丢弃。
    Invalid(WsError),
}

/// 将一个底层 WebSocket 帧解码为 `DecodedFrame`。
pub fn decode_frame(message: Message) -> DecodedFrame {
    match message {
        Message::Text(text) => decode_text(&text),
        Message::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(text) => decode_text(&text),
            Err(e) => DecodedFrame::Invalid(WsError::Message(format!("二进制帧不是合法的 UTF-8 文本: {}", e))),
        },
        Message::Pong(_) => DecodedFrame::HeartbeatAck,
        Message::Ping(_) | Message::Frame(_) => DecodedFrame::Skip,
        Message::Close(frame) => match frame {
            Some(frame) => DecodedFrame::Close {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.into_owned(),
            },
            None => DecodedFrame::Close { code: None, reason: String::new() },
        },
    }
}

fn decode_text(text: &str) -> DecodedFrame {
    match Envelope::from_json(text) {
        Ok(envelope) if envelope.message_type == HEARTBEAT_ACK_TYPE || envelope.message_type == PONG_TYPE => {
            DecodedFrame::HeartbeatAck
        }
        Ok(envelope) => DecodedFrame::Envelope(envelope),
        Err(e) => DecodedFrame::Invalid(e),
    }
}

/// 投递给通道任务的出站指令。
#[derive(Debug)]
enum Outbound {
    Frame(Message),
    Close { code: u16, reason: String },
}

/// 基于 `tokio-tungstenite` 的通道工厂。
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        WsConnector
    }
}

impl Connector for WsConnector {
    fn open(&self, url: Url, channel_id: ChannelId, events: ChannelEventSender) -> Box<dyn Channel> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        tokio::spawn(run_channel(url, channel_id, events, outbound_rx, open.clone()));
        Box::new(WsChannel { id: channel_id, outbound_tx, open })
    }
}

/// `WsConnector` 创建的通道句柄。
#[derive(Debug)]
pub struct WsChannel {
    id: ChannelId,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl Channel for WsChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn send(&self, envelope: &Envelope) -> bool {
        if !self.open.load(Ordering::SeqCst) {
            debug!("[通道传输] {} 尚未打开或已关闭，拒绝发送 (类型: {})", self.id, envelope.message_type);
            return false;
        }
        match envelope.to_json() {
            Ok(text) => {
                debug!("[通道传输] {} 准备发送: {}", self.id, preview(&text));
                self.outbound_tx.send(Outbound::Frame(Message::Text(text))).is_ok()
            }
            Err(e) => {
                error!("[通道传输] {} 序列化出站消息失败: {}", self.id, e);
                false
            }
        }
    }

    fn close(&self, code: u16, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.outbound_tx.send(Outbound::Close { code, reason: reason.to_string() });
    }
}

/// 单条通道的完整生命周期：连接、收发循环、关闭。
async fn run_channel(
    url: Url,
    channel_id: ChannelId,
    events: ChannelEventSender,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
) {
    let emit = |kind: ChannelEventKind| {
        let _ = events.send(ChannelEvent { channel_id, kind });
    };

    info!("[通道传输] {} 开始连接: {}", channel_id, redact(&url));

    // 连接阶段同样监听出站指令，以便在握手完成前就响应关闭或句柄释放。
    let connecting = connect_async(url.as_str());
    tokio::pin!(connecting);
    let ws_stream = loop {
        tokio::select! {
            result = &mut connecting => match result {
                Ok((ws_stream, response)) => {
                    info!("[通道传输] {} 连接成功 (HTTP 状态码: {})", channel_id, response.status());
                    break ws_stream;
                }
                Err(e) => {
                    let err = WsError::from(e);
                    error!("[通道传输] {} 连接失败: {}", channel_id, err);
                    emit(ChannelEventKind::Error(err.to_string()));
                    emit(ChannelEventKind::Closed { code: None, reason: format!("连接建立失败: {}", err) });
                    return;
                }
            },
            command = outbound_rx.recv() => match command {
                None => {
                    debug!("[通道传输] {} 在连接建立前句柄已释放，放弃连接", channel_id);
                    return;
                }
                Some(Outbound::Close { code, reason }) => {
                    info!("[通道传输] {} 在连接建立前被请求关闭: {}", channel_id, reason);
                    emit(ChannelEventKind::Closed { code: Some(code), reason });
                    return;
                }
                Some(Outbound::Frame(_)) => {
                    debug!("[通道传输] {} 尚未打开，丢弃出站帧", channel_id);
                }
            },
        }
    };

    open.store(true, Ordering::SeqCst);
    emit(ChannelEventKind::Opened);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut requested_close: Option<(u16, String)> = None;
    let mut close_deadline: Option<Instant> = None;

    let (code, reason) = loop {
        tokio::select! {
            command = outbound_rx.recv(), if requested_close.is_none() => match command {
                Some(Outbound::Frame(message)) => {
                    if let Err(e) = ws_sender.send(message).await {
                        error!("[通道传输] {} 发送失败: {}", channel_id, e);
                        emit(ChannelEventKind::Error(e.to_string()));
                        break (None, format!("发送失败: {}", e));
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    open.store(false, Ordering::SeqCst);
                    debug!("[通道传输] {} 发送 Close 帧 (code: {}, reason: {})", channel_id, code, reason);
                    let frame = CloseFrame { code: CloseCode::from(code), reason: Cow::Owned(reason.clone()) };
                    if let Err(e) = ws_sender.send(Message::Close(Some(frame))).await {
                        debug!("[通道传输] {} 发送 Close 帧失败，直接视为已关闭: {}", channel_id, e);
                        break (Some(code), reason);
                    }
                    close_deadline = Some(Instant::now() + CLOSE_HANDSHAKE_TIMEOUT);
                    requested_close = Some((code, reason));
                }
                None => {
                    open.store(false, Ordering::SeqCst);
                    debug!("[通道传输] {} 句柄已释放，静默关闭连接", channel_id);
                    let _ = timeout(CLOSE_HANDSHAKE_TIMEOUT, ws_sender.close()).await;
                    return;
                }
            },
            frame = ws_receiver.next() => match frame {
                Some(Ok(message)) => match decode_frame(message) {
                    DecodedFrame::Envelope(envelope) => emit(ChannelEventKind::Message(envelope)),
                    DecodedFrame::HeartbeatAck => emit(ChannelEventKind::HeartbeatAck),
                    DecodedFrame::Close { code, reason } => {
                        debug!("[通道传输] {} 收到 Close 帧 (code: {:?}, reason: {})", channel_id, code, reason);
                        break match requested_close.take() {
                            Some((requested, requested_reason)) => (Some(requested), requested_reason),
                            None => (code, reason),
                        };
                    }
                    DecodedFrame::Skip => {}
                    DecodedFrame::Invalid(e) => warn!("[通道传输] {} 丢弃无法解码的帧: {}", channel_id, e),
                },
                Some(Err(TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed)) | None => {
                    break match requested_close.take() {
                        Some((requested, requested_reason)) => (Some(requested), requested_reason),
                        None => (None, "连接已断开".to_string()),
                    };
                }
                Some(Err(e)) => {
                    let err = WsError::from(e);
                    error!("[通道传输] {} 接收时发生底层错误: {}", channel_id, err);
                    emit(ChannelEventKind::Error(err.to_string()));
                    break match requested_close.take() {
                        Some((requested, requested_reason)) => (Some(requested), requested_reason),
                        None => (None, err.to_string()),
                    };
                }
            },
            _ = sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                warn!("[通道传输] {} 等待服务端 Close 回复超时", channel_id);
                break match requested_close.take() {
                    Some((requested, requested_reason)) => (Some(requested), requested_reason),
                    None => (None, "关闭握手超时".to_string()),
                };
            }
        }
    };

    open.store(false, Ordering::SeqCst);
    // 尽力把底层库排队的 Close 回复写出去。
    let _ = timeout(CLOSE_HANDSHAKE_TIMEOUT, ws_sender.close()).await;
    info!("[通道传输] {} 已关闭 (code: {:?}, reason: {})", channel_id, code, reason);
    emit(ChannelEventKind::Closed { code, reason });
}

/// 日志中隐藏凭证参数。
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == TOKEN_QUERY_PARAM { "***".to_string() } else { value.into_owned() };
            (key.into_owned(), value)
        })
        .collect();
    if !pairs.is_empty() {
        shown.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }
    shown.to_string()
}
