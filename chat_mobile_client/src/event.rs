// chat_mobile_client/src/event.rs

//! 定义会话控制器与 UI 协作方之间的回调契约和状态事件。
//!
//! - `ConnectHandlers`: 随 `connect` 传入的一组回调，归属于当次会话，房间切换时整体替换。
//! - `MessageHandler`: 通过 `add_message_handler` 注册的消息处理器，归属于控制器，跨房间切换保留。
//! - `ConnectionStatus`: 经 `watch` 通道发布的只读状态快照，可用于渲染“重连中…”提示。

use crate::error::ClientError;
use chat_models::enums::ConnectionState;
use chat_websocket_utils::message::Envelope;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// 入站消息处理器。返回 `Err` 或发生 panic 都只会被记录日志，不影响其它处理器。
pub type MessageHandler = Arc<dyn Fn(&Envelope) -> anyhow::Result<()> + Send + Sync>;
pub type OpenCallback = Arc<dyn Fn() + Send + Sync>;
/// 关闭回调，参数为关闭码（未收到关闭帧时为 `None`）与原因。
pub type CloseCallback = Arc<dyn Fn(Option<u16>, &str) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// 消息处理器的注册标识，按注册顺序单调递增。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u64);

/// `connect` 时传入的会话级回调，全部可选。
#[derive(Clone, Default)]
pub struct ConnectHandlers {
    pub on_open: Option<OpenCallback>,
    pub on_message: Option<MessageHandler>,
    pub on_close: Option<CloseCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl ConnectHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(callback));
        self
    }

    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(handler));
        self
    }

    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn(Option<u16>, &str) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for ConnectHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectHandlers")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// 连接状态快照。
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// 当前绑定的房间，未绑定时为 `None`。
    pub room_id: Option<String>,
    /// 当前这一轮重连的序号，连接稳定后清零。
    pub reconnect_attempt: u32,
    /// 最近一次连接层错误的描述。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_for_ui() {
        let status = ConnectionStatus {
            state: ConnectionState::Reconnecting,
            room_id: Some("A".to_string()),
            reconnect_attempt: 2,
            last_error: None,
        };
        let json = serde_json::to_string(&status).expect("序列化状态失败");
        assert_eq!(json, r#"{"state":"reconnecting","room_id":"A","reconnect_attempt":2}"#);
        assert!(!status.is_connected());
    }

    #[test]
    fn test_handlers_builder_and_debug() {
        let handlers = ConnectHandlers::new().on_open(|| {}).on_close(|_, _| {});
        assert!(handlers.on_open.is_some());
        assert!(handlers.on_message.is_none());
        let debug = format!("{:?}", handlers);
        assert!(debug.contains("on_open: true"));
        assert!(debug.contains("on_error: false"));
    }
}
