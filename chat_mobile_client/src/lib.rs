//! `chat_mobile_client` 移动端聊天客户端的实时连接核心。
//!
//! 由组合根（`chat-client` 演示程序或宿主应用）构造一个 `SessionController`，
//! 注入配置与 `Connector`，然后通过它连接房间、收发消息。

pub mod config;
pub mod error;
pub mod event;
pub mod ws_client;

pub use config::ClientConfig;
pub use error::ClientError;
pub use event::{ConnectHandlers, ConnectionStatus, HandlerId};
pub use ws_client::SessionController;
