// chat_mobile_client/src/error.rs

//! 聊天客户端的错误类型。
//!
//! 连接层面的失败只通过回调（`on_error` / `on_close`）和状态通道传播，
//! 这里的错误类型是回调所携带的内容，以及少数同步 API 的返回值。

use chat_websocket_utils::error::WsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// 会话控制器的后台任务已经退出。
    #[error("会话控制器已停止运行")]
    ActorStopped,

    #[error("无效的连接端点: {0}")]
    InvalidEndpoint(String),

    /// 重连次数耗尽，需要调用方重新发起 `connect`。
    #[error("重连已放弃: 连续 {attempts} 次重连均未成功 (房间: {room_id})")]
    ReconnectExhausted { room_id: String, attempts: u32 },

    #[error("连续 {missed} 次心跳未收到应答，连接被判定为不健康")]
    HealthCheckFailed { missed: u32 },

    #[error("传输层错误: {0}")]
    Transport(#[from] WsError),

    #[error("消息处理器执行失败: {0}")]
    HandlerFailed(String),
}
