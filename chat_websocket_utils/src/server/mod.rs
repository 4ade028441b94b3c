// chat_websocket_utils/src/server/mod.rs

//! WebSocket 服务端模块。
//!
//! 提供一个最小的房间转发服务器：
//! - `ServerTransport`: 监听 TCP、完成握手，并从握手请求的查询串中提取 `token` 与 `chatroom_id`。
//! - `RoomRelay`: 按房间分组连接，应答心跳，并把 `chat_message` 以 `new_message` 广播给同房间成员。
//!
//! 它不是生产聊天后端，只用于集成测试和 `chat-client` 演示程序的本地联调。

pub mod transport;

pub use transport::{start_room_relay, ConnectionRequest, RelayOptions, RoomRelay, ServerTransport, WsStream};
