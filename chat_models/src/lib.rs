//! `chat_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了聊天客户端各个 Rust 组件（`chat_websocket_utils` 传输层、
//! `chat_mobile_client` 会话控制器）之间共享的数据结构和枚举类型。
//!
//! - **WebSocket 消息负载 (`ws_payloads`)**: 消息类型常量以及各类业务载荷结构体，
//!   例如聊天消息、消息更新/删除、成员进出房间、输入状态等。
//! - **通用枚举 (`enums`)**: 连接状态 `ConnectionState` 等。
//!
//! 所有模型都派生 `Serialize`、`Deserialize`、`Debug` 与 `Clone`。

pub mod enums;
pub mod ws_payloads;
