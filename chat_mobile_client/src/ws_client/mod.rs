// chat_mobile_client/src/ws_client/mod.rs

//! 聊天客户端的实时连接模块根文件。
//!
//! ## 核心组件：
//! - `service`: 会话控制器 `SessionController`，对外唯一入口，协调下列组件。
//! - `heartbeat`: 心跳监视器，检测连接是否存活。
//! - `reconnect`: 重连调度器，负责指数退避与重连次数上限。
//! - `outbound_queue`: 有界出站队列，暂存通道未打开时的消息。
//! - `timers`: 定时器句柄与请求通道，定时器只能向控制器“发请求”，不能直接操作通道。

pub mod heartbeat;
pub mod outbound_queue;
pub mod reconnect;
pub mod service;
pub mod timers;

pub use service::SessionController;
