//! `chat_websocket_utils` 提供聊天实时通道所需的 WebSocket 通信实用功能。
//!
//! 主要模块包括：
//! - `message`: 定义线上消息单元 `Envelope`。
//! - `error`: 定义库中使用的错误类型 `WsError`。
//! - `client`: 客户端通道传输层（`Connector` / `Channel` 抽象及基于 `tokio-tungstenite` 的实现）。
//! - `server`: 本地回环房间服务器，供集成测试与演示程序使用。

pub mod client;
pub mod error;
pub mod message;
pub mod server;
