// chat_websocket_utils/src/error.rs

//! 定义 WebSocket 工具库相关的错误类型。

use thiserror::Error;

/// `chat_websocket_utils` 中所有操作可能返回的统一错误类型。
#[derive(Error, Debug)]
pub enum WsError {
    #[error("序列化错误: {0}")]
    SerializationError(String),

    #[error("反序列化错误: {0}")]
    DeserializationError(String),

    /// 底层 tungstenite 的协议/握手错误。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("I/O错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 收到了无法解码的帧（非 UTF-8 的二进制帧等）。
    #[error("消息错误: {0}")]
    Message(String),
}
