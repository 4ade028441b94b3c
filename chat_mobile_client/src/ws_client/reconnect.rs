// chat_mobile_client/src/ws_client/reconnect.rs

//! 重连调度器。
//!
//! 只处理非预期关闭：按 `min(base * multiplier^consecutive_failures + jitter, max_delay)`
//! 计算延迟并启动一个定时器，到期后通过 `Requester` 请求控制器重连。
//! 连接保持打开满一个稳定窗口后，`attempts` 与 `consecutive_failures` 一并清零。

use crate::config::ReconnectConfig;
use crate::ws_client::timers::{Requester, TimerHandle, TimerRequest};
use chat_websocket_utils::client::ChannelId;
use log::{debug, info, warn};
use std::time::Duration;

/// 一次调度的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled { attempt: u32, delay: Duration },
    /// 已达到重连次数上限，不再调度。
    Exhausted { attempts: u32 },
}

#[derive(Debug)]
pub struct ReconnectScheduler {
    config: ReconnectConfig,
    attempts: u32,
    consecutive_failures: u32,
    generation: u64,
    pending: Option<(u64, TimerHandle)>,
    stability: Option<TimerHandle>,
}

impl ReconnectScheduler {
    pub fn new(config: ReconnectConfig) -> Self {
        ReconnectScheduler {
            config,
            attempts: 0,
            consecutive_failures: 0,
            generation: 0,
            pending: None,
            stability: None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// 不含抖动的退避延迟，已按 `max_delay` 封顶。
    pub fn base_delay(&self, consecutive_failures: u32) -> Duration {
        self.compute_delay(consecutive_failures, Duration::ZERO)
    }

    pub fn compute_delay(&self, consecutive_failures: u32, jitter: Duration) -> Duration {
        let exponent = i32::try_from(consecutive_failures).unwrap_or(i32::MAX);
        let scaled = self.config.base_delay_ms as f64 * self.config.multiplier.powi(exponent);
        let max_ms = self.config.max_delay_ms as f64;
        let total = (scaled + jitter.as_millis() as f64).min(max_ms);
        Duration::from_millis(total.max(0.0) as u64)
    }

    fn random_jitter(&self) -> Duration {
        let max_ms = self.config.jitter_max_ms;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis((rand::random::<f64>() * (max_ms as f64 + 1.0)).floor().min(max_ms as f64) as u64)
    }

    /// 为一次非预期关闭调度重连。
    pub fn schedule(&mut self, requester: &Requester) -> ScheduleOutcome {
        self.stop_stability_window();
        if self.attempts >= self.config.max_attempts {
            self.cancel_pending();
            warn!("[重连调度器] 已重连 {} 次仍未成功，放弃重连", self.attempts);
            return ScheduleOutcome::Exhausted { attempts: self.attempts };
        }

        let delay = self.compute_delay(self.consecutive_failures, self.random_jitter());
        self.attempts += 1;
        self.consecutive_failures += 1;
        self.generation += 1;

        let generation = self.generation;
        let requester = requester.clone();
        let timer = TimerHandle::spawn("reconnect", async move {
            tokio::time::sleep(delay).await;
            requester.request(TimerRequest::Reconnect { generation });
        });
        self.pending = Some((generation, timer));

        info!(
            "[重连调度器] 第 {}/{} 次重连将在 {} ms 后进行",
            self.attempts,
            self.config.max_attempts,
            delay.as_millis()
        );
        ScheduleOutcome::Scheduled { attempt: self.attempts, delay }
    }

    /// 重连定时器到期时调用。只有与当前调度匹配的请求才返回 `true`。
    pub fn take_due(&mut self, generation: u64) -> bool {
        match &self.pending {
            Some((pending, _)) if *pending == generation => {
                self.pending = None;
                true
            }
            _ => {
                debug!("[重连调度器] 忽略过期的重连请求 (generation: {})", generation);
                false
            }
        }
    }

    pub fn cancel_pending(&mut self) {
        if let Some((_, timer)) = self.pending.take() {
            timer.cancel();
        }
    }

    /// 通道打开后开始计时稳定窗口。
    pub fn start_stability_window(&mut self, channel_id: ChannelId, requester: &Requester) {
        let window = self.config.stability_window();
        let requester = requester.clone();
        self.stability = Some(TimerHandle::spawn("stability", async move {
            tokio::time::sleep(window).await;
            requester.request(TimerRequest::StabilityReached(channel_id));
        }));
    }

    pub fn stop_stability_window(&mut self) {
        if let Some(timer) = self.stability.take() {
            timer.cancel();
        }
    }

    /// 连接已稳定，忘记过往的失败。
    pub fn on_stable(&mut self) {
        self.stability = None;
        if self.attempts > 0 || self.consecutive_failures > 0 {
            info!("[重连调度器] 连接已稳定，重连计数清零 (之前: {} 次)", self.attempts);
        }
        self.attempts = 0;
        self.consecutive_failures = 0;
    }

    /// 取消所有定时器并清零计数。用于主动断开、房间切换与重新 `connect`。
    pub fn reset(&mut self) {
        self.cancel_pending();
        self.stop_stability_window();
        self.attempts = 0;
        self.consecutive_failures = 0;
    }
}
