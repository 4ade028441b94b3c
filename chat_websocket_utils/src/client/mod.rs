// chat_websocket_utils/src/client/mod.rs

//! WebSocket 客户端模块。
//!
//! 本模块对外提供通道传输层的两个抽象：
//! - `Connector`: 打开一条新的通道（每次连接尝试一条）。
//! - `Channel`: 一条已创建通道的发送/关闭能力。
//!
//! 通道的生命周期事件（打开、消息、心跳应答、关闭、错误）统一通过 `ChannelEvent`
//! 异步上报给调用方，每个事件都携带 `ChannelId`，调用方据此丢弃过期通道的事件。
//!
//! `transport` 子模块包含基于 `tokio-tungstenite` 的具体实现 `WsConnector`。

pub mod transport;

pub use transport::{
    build_room_url, Channel, ChannelEvent, ChannelEventKind, ChannelEventSender, ChannelId, Connector,
    WsConnector,
};
