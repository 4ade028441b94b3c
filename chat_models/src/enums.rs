// chat_models/src/enums.rs

//! 项目中通用的枚举类型定义。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 实时通道的连接状态。
///
/// 正常生命周期为 `Idle → Connecting → Open → Closing → Idle`；
/// 当 `Open` 或 `Connecting` 状态下发生非预期关闭时，进入 `Reconnecting` 子状态，
/// 等待重连调度器的延迟结束后重新回到 `Connecting`。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// 没有活动通道。`disconnect()` 之后或重连次数耗尽之后的终态。
    #[default]
    Idle,
    /// 正在建立物理连接。
    Connecting,
    /// 通道已打开，可以直接发送消息。
    Open,
    /// 已请求关闭通道（主动断开或房间切换），等待关闭完成。
    Closing,
    /// 非预期关闭后，等待下一次重连尝试。
    Reconnecting,
}

impl ConnectionState {
    /// 是否处于“已绑定会话且正在或即将使用通道”的状态。
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}
