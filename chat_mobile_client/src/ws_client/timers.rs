// chat_mobile_client/src/ws_client/timers.rs

//! 定时器句柄与请求通道。
//!
//! 心跳、重连延迟、稳定窗口与切换宽限期都以独立的 Tokio 任务实现。
//! 这些任务从不直接接触通道或会话状态，只能通过 `Requester` 向控制器发出带身份标识的请求，
//! 由控制器判断请求是否仍然有效。

use chat_websocket_utils::client::ChannelId;
use log::debug;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 定时器向控制器发出的请求。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRequest {
    /// 请求在指定通道上发送一次心跳探测。
    SendProbe(ChannelId),
    /// 指定通道连续错过心跳应答，请求强制关闭。
    HealthCheckFailed { channel_id: ChannelId, missed: u32 },
    /// 重连延迟已到。`generation` 用于识别被取消或替换的调度。
    Reconnect { generation: u64 },
    /// 指定通道已保持打开满一个稳定窗口。
    StabilityReached(ChannelId),
    /// 房间切换的宽限期已到。
    SwitchGraceElapsed { generation: u64 },
}

/// 定时器持有的请求能力。
#[derive(Debug, Clone)]
pub struct Requester {
    tx: mpsc::UnboundedSender<TimerRequest>,
}

impl Requester {
    pub fn new(tx: mpsc::UnboundedSender<TimerRequest>) -> Self {
        Requester { tx }
    }

    /// 发出请求。控制器已退出时返回 `false`，调用方应随之结束。
    pub fn request(&self, request: TimerRequest) -> bool {
        self.tx.send(request).is_ok()
    }
}

/// 后台定时任务的句柄。取消或丢弃句柄都会中止任务。
#[derive(Debug)]
pub struct TimerHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl TimerHandle {
    pub fn spawn<F>(name: &'static str, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        TimerHandle { name, handle: tokio::spawn(task) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn cancel(self) {
        // Drop 负责中止
        debug!("[定时器] 取消定时器: {}", self.name);
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
