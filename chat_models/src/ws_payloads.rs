// chat_models/src/ws_payloads.rs

//! 包含聊天 WebSocket 通信中使用的消息类型常量与各种 Payload 结构体定义。
//!
//! 每一条线上消息（`Envelope`）都带有一个 `type` 字段，接收方据此决定如何解释 `data`。
//! 其中 `heartbeat` / `heartbeat_ack` 为保留类型，仅用于连接健康检查，永远不会转发给订阅者。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 客户端发出的聊天消息。
pub const CHAT_MESSAGE_TYPE: &str = "chat_message";
/// 服务端广播的新消息。
pub const NEW_MESSAGE_TYPE: &str = "new_message";
/// 服务端通知某条消息已被编辑。
pub const MESSAGE_UPDATED_TYPE: &str = "message_updated";
/// 服务端通知某条消息已被删除。
pub const MESSAGE_DELETED_TYPE: &str = "message_deleted";
/// 成员进入房间。
pub const USER_JOINED_TYPE: &str = "user_joined";
/// 成员离开房间。
pub const USER_LEFT_TYPE: &str = "user_left";
/// 成员正在输入。
pub const TYPING_TYPE: &str = "typing";

/// 心跳探测（保留类型）。
pub const HEARTBEAT_TYPE: &str = "heartbeat";
/// 心跳应答（保留类型）。
pub const HEARTBEAT_ACK_TYPE: &str = "heartbeat_ack";
/// 部分服务端以 `pong` 作为心跳应答，传输层按应答处理。
pub const PONG_TYPE: &str = "pong";

/// 判断消息类型是否为保留的心跳类型。保留类型的消息不会派发给订阅者。
pub fn is_reserved_type(message_type: &str) -> bool {
    message_type == HEARTBEAT_TYPE || message_type == HEARTBEAT_ACK_TYPE
}

/// 聊天消息的载荷，`chat_message` 与 `new_message` 共用。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessagePayload {
    /// 消息正文。
    pub content: String,
    /// 服务端分配的消息 ID；客户端发出时通常为空。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// 发送者用户 ID，由服务端填写。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// 回复的目标消息 ID。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// 已上传附件的 URL 列表（上传本身由 REST 客户端完成）。
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl ChatMessagePayload {
    /// 以正文创建一条待发送的聊天消息，其余字段留空。
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_id: None,
            sender_id: None,
            reply_to: None,
            attachments: Vec::new(),
            sent_at: Some(Utc::now()),
        }
    }
}

/// `message_updated` 的载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageUpdatedPayload {
    pub message_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

/// `message_deleted` 的载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageDeletedPayload {
    pub message_id: String,
}

/// `user_joined` / `user_left` 的载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserPresencePayload {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// `typing` 的载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TypingPayload {
    pub user_id: String,
    pub is_typing: bool,
}

/// 心跳探测与应答的载荷（空结构体）。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct HeartbeatPayload {}
