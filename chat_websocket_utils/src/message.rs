// chat_websocket_utils/src/message.rs

//! 定义聊天实时通道中使用的线上消息单元 `Envelope`。
//!
//! 客户端与服务端之间的每一条消息（无论入站还是出站）都被建模为一个 `Envelope`：
//!
//! ```json
//! { "type": "chat_message", "data": { "content": "hi" }, "chatroom_id": "42", "id": "..." }
//! ```
//!
//! `type` 必须存在，缺少 `type` 的帧在解码时被拒绝；其余字段均可选。
//! 本模块只负责“能否解析”，不对具体业务载荷做额外的协议校验。

use crate::error::WsError;
use chat_models::ws_payloads::{self, HeartbeatPayload};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 线上消息单元。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    /// 消息业务类型，例如 `chat_message`、`new_message`、`heartbeat`。
    #[serde(rename = "type")]
    pub message_type: String,

    /// 不透明的业务载荷，结构由 `message_type` 决定。
    #[serde(default)]
    pub data: Value,

    /// 消息所属的聊天室 ID。服务端可能以数字形式下发，统一解析为字符串。
    #[serde(
        rename = "chatroom_id",
        default,
        deserialize_with = "deserialize_optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub room_id: Option<String>,

    /// 可选的关联 ID，用于追踪出站消息。
    #[serde(
        default,
        deserialize_with = "deserialize_optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
}

impl Envelope {
    /// 以任意可序列化的载荷创建一个 `Envelope`。
    ///
    /// # Returns
    /// * `Err(WsError::SerializationError)` - 载荷无法序列化为 JSON 时。
    pub fn new<T: Serialize>(message_type: impl Into<String>, payload: &T) -> Result<Self, WsError> {
        let data = serde_json::to_value(payload)
            .map_err(|e| WsError::SerializationError(format!("创建 Envelope 时序列化载荷失败: {}", e)))?;
        Ok(Self::raw(message_type, data))
    }

    /// 以现成的 JSON 值创建一个 `Envelope`。
    pub fn raw(message_type: impl Into<String>, data: Value) -> Self {
        Envelope {
            message_type: message_type.into(),
            data,
            room_id: None,
            id: None,
        }
    }

    /// 心跳探测消息。
    pub fn heartbeat() -> Self {
        Self::raw(ws_payloads::HEARTBEAT_TYPE, heartbeat_data())
    }

    /// 心跳应答消息。
    pub fn heartbeat_ack() -> Self {
        Self::raw(ws_payloads::HEARTBEAT_ACK_TYPE, heartbeat_data())
    }

    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// 若尚无关联 ID，则生成一个 UUID v4 并返回当前的 ID。
    pub fn ensure_id(&mut self) -> &str {
        self.id.get_or_insert_with(|| Uuid::new_v4().to_string()).as_str()
    }

    /// 是否为保留的心跳类型（`heartbeat` / `heartbeat_ack`）。
    pub fn is_reserved(&self) -> bool {
        ws_payloads::is_reserved_type(&self.message_type)
    }

    /// 将 `data` 反序列化为指定的业务载荷类型。
    pub fn data_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, WsError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            WsError::DeserializationError(format!(
                "Envelope(type={}) 的 data 反序列化为目标类型失败: {}",
                self.message_type, e
            ))
        })
    }

    pub fn to_json(&self) -> Result<String, WsError> {
        serde_json::to_string(self)
            .map_err(|e| WsError::SerializationError(format!("Envelope 序列化为JSON失败: {}", e)))
    }

    /// 从 JSON 文本解析一个 `Envelope`；缺少 `type` 或不是 JSON 对象时返回错误。
    pub fn from_json(text: &str) -> Result<Self, WsError> {
        serde_json::from_str(text).map_err(|e| {
            WsError::DeserializationError(format!("文本帧解析为 Envelope 失败: {}, 原始文本: '{}'", e, preview(text)))
        })
    }
}

fn heartbeat_data() -> Value {
    serde_json::to_value(HeartbeatPayload::default()).unwrap_or(Value::Null)
}

/// 日志中只展示文本的前 120 个字符。
pub(crate) fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

/// 接受字符串或数字形式的 ID，统一转换为 `Option<String>`。
fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!("ID 字段应为字符串或数字，实际为: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_models::ws_payloads::{ChatMessagePayload, CHAT_MESSAGE_TYPE};

    #[test]
    /// 测试 `Envelope::new` 能正确写入类型与载荷，并能通过 `data_as` 取回原始载荷。
    fn test_envelope_new_and_data_as() {
        let payload = ChatMessagePayload::text("用于 Envelope 构造测试的内容");
        let envelope = Envelope::new(CHAT_MESSAGE_TYPE, &payload).expect("创建 Envelope 失败");
        assert_eq!(envelope.message_type, CHAT_MESSAGE_TYPE);
        assert!(envelope.room_id.is_none());
        assert!(envelope.id.is_none());

        let back: ChatMessagePayload = envelope.data_as().expect("data_as 反序列化失败");
        assert_eq!(back, payload, "从 data 取回的载荷与原始载荷不一致");
    }

    #[test]
    /// 线上字段名应为 `type` / `data` / `chatroom_id` / `id`，空的可选字段不输出。
    fn test_envelope_wire_field_names() {
        let envelope = Envelope::raw("typing", serde_json::json!({"user_id": "u1", "is_typing": true}))
            .with_room("room-7")
            .with_id("corr-1");
        let value: Value = serde_json::from_str(&envelope.to_json().expect("序列化失败")).expect("输出不是合法 JSON");
        assert_eq!(value["type"], "typing");
        assert_eq!(value["chatroom_id"], "room-7");
        assert_eq!(value["id"], "corr-1");
        assert_eq!(value["data"]["user_id"], "u1");

        let bare = Envelope::heartbeat().to_json().expect("序列化失败");
        assert!(!bare.contains("chatroom_id"), "未绑定房间时不应输出 chatroom_id: {}", bare);
        assert!(!bare.contains("\"id\""), "未设置 ID 时不应输出 id: {}", bare);
    }

    #[test]
    /// 缺少 `type` 的帧必须被拒绝。
    fn test_from_json_rejects_missing_type() {
        let result = Envelope::from_json(r#"{"data":{"content":"x"}}"#);
        match result {
            Err(WsError::DeserializationError(details)) => {
                println!("捕获到预期的反序列化错误，详情: {}", details);
            }
            other => panic!("缺少 type 时预期 DeserializationError，实际: {:?}", other),
        }
        assert!(Envelope::from_json("not json").is_err(), "非 JSON 文本应被拒绝");
        assert!(Envelope::from_json("[1,2,3]").is_err(), "JSON 数组应被拒绝");
    }

    #[test]
    /// 服务端以数字下发的 chatroom_id / id 应被接受并转换为字符串。
    fn test_from_json_accepts_numeric_ids() {
        let envelope = Envelope::from_json(r#"{"type":"new_message","data":{},"chatroom_id":42,"id":7}"#)
            .expect("数字形式的 ID 应能解析");
        assert_eq!(envelope.room_id.as_deref(), Some("42"));
        assert_eq!(envelope.id.as_deref(), Some("7"));

        let missing_data = Envelope::from_json(r#"{"type":"heartbeat_ack"}"#).expect("缺少 data 的帧应能解析");
        assert_eq!(missing_data.data, Value::Null);
        assert!(missing_data.is_reserved());

        assert!(
            Envelope::from_json(r#"{"type":"new_message","chatroom_id":{"a":1}}"#).is_err(),
            "对象形式的 chatroom_id 应被拒绝"
        );
    }

    #[test]
    fn test_ensure_id_is_stable() {
        let mut envelope = Envelope::raw(CHAT_MESSAGE_TYPE, Value::Null);
        let first = envelope.ensure_id().to_string();
        assert!(!first.is_empty());
        assert_eq!(envelope.ensure_id(), first, "已有 ID 时 ensure_id 不应重新生成");

        let mut preset = Envelope::raw(CHAT_MESSAGE_TYPE, Value::Null).with_id("fixed");
        assert_eq!(preset.ensure_id(), "fixed");
    }

    #[test]
    fn test_data_as_mismatched_type_error() {
        let envelope = Envelope::raw(CHAT_MESSAGE_TYPE, serde_json::json!({"unexpected": 1}));
        let result: Result<ChatMessagePayload, WsError> = envelope.data_as();
        assert!(
            matches!(result, Err(WsError::DeserializationError(_))),
            "缺少 content 字段时预期 DeserializationError"
        );
    }
}
