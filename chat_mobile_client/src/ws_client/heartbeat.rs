// chat_mobile_client/src/ws_client/heartbeat.rs

//! 心跳监视器。
//!
//! 每条打开的通道对应一个监视器：每隔 `interval` 请求一次探测，然后最多等待
//! `response_timeout` 接收应答。连续 `max_missed` 次未收到应答时，请求控制器强制关闭通道。
//! 任何应答（包括迟到的应答）都会把未应答计数清零。
//!
//! 监视器只持有 `Requester`，不持有通道本身；通道关闭时由控制器停止监视器。

use crate::config::HeartbeatConfig;
use crate::ws_client::timers::{Requester, TimerHandle, TimerRequest};
use chat_websocket_utils::client::ChannelId;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

#[derive(Debug)]
pub struct HeartbeatMonitor {
    channel_id: ChannelId,
    ack_tx: mpsc::UnboundedSender<()>,
    timer: TimerHandle,
}

impl HeartbeatMonitor {
    /// 为刚打开的通道启动监视器。第一次探测在一个完整间隔之后发出。
    pub fn start(channel_id: ChannelId, config: &HeartbeatConfig, requester: Requester) -> Self {
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let timer = TimerHandle::spawn("heartbeat", run_monitor(channel_id, config.clone(), requester, ack_rx));
        debug!("[心跳监视器] {} 已启动 (间隔: {} ms)", channel_id, config.interval_ms);
        HeartbeatMonitor { channel_id, ack_tx, timer }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn record_ack(&self) {
        let _ = self.ack_tx.send(());
    }

    pub fn stop(self) {
        debug!("[心跳监视器] {} 已停止", self.channel_id);
        self.timer.cancel();
    }
}

async fn run_monitor(
    channel_id: ChannelId,
    config: HeartbeatConfig,
    requester: Requester,
    mut acks: mpsc::UnboundedReceiver<()>,
) {
    let period = config.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut missed: u32 = 0;

    loop {
        ticker.tick().await;

        // 上一轮超时之后才到达的应答同样视为连接存活。
        while acks.try_recv().is_ok() {
            missed = 0;
        }

        if !requester.request(TimerRequest::SendProbe(channel_id)) {
            return;
        }

        match timeout(config.response_timeout(), acks.recv()).await {
            Ok(Some(())) => {
                if missed > 0 {
                    debug!("[心跳监视器] {} 收到应答，未应答计数清零 (之前: {})", channel_id, missed);
                }
                missed = 0;
            }
            Ok(None) => return,
            Err(_) => {
                missed += 1;
                warn!("[心跳监视器] {} 心跳应答超时 ({}/{})", channel_id, missed, config.max_missed);
                if missed >= config.max_missed {
                    requester.request(TimerRequest::HealthCheckFailed { channel_id, missed });
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> HeartbeatConfig {
        HeartbeatConfig { interval_ms: 30_000, response_timeout_ms: 10_000, max_missed: 3 }
    }

    #[tokio::test(start_paused = true)]
    /// 连续 3 次未应答后发出健康检查失败请求。
    async fn test_three_missed_acks_request_force_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = Instant::now();
        let _monitor = HeartbeatMonitor::start(ChannelId(1), &config(), Requester::new(tx));

        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(TimerRequest::SendProbe(ChannelId(1))));
        }
        assert_eq!(
            rx.recv().await,
            Some(TimerRequest::HealthCheckFailed { channel_id: ChannelId(1), missed: 3 })
        );
        assert_eq!(started.elapsed(), Duration::from_secs(100), "第三次探测 (90 s) 之后再等 10 s 超时");
    }

    #[tokio::test(start_paused = true)]
    /// 任何一次应答都会把未应答计数清零。
    async fn test_ack_resets_missed_count() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = HeartbeatMonitor::start(ChannelId(2), &config(), Requester::new(tx));

        // 前两次探测不应答。
        for _ in 0..2 {
            assert_eq!(rx.recv().await, Some(TimerRequest::SendProbe(ChannelId(2))));
        }
        // 第三次探测及时应答。
        assert_eq!(rx.recv().await, Some(TimerRequest::SendProbe(ChannelId(2))));
        monitor.record_ack();

        // 之后还需要再连续错过 3 次才会判定失败。
        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(TimerRequest::SendProbe(ChannelId(2))));
        }
        assert_eq!(
            rx.recv().await,
            Some(TimerRequest::HealthCheckFailed { channel_id: ChannelId(2), missed: 3 })
        );
    }

    #[tokio::test(start_paused = true)]
    /// 超时之后才到达的应答同样清零计数。
    async fn test_late_ack_resets_missed_count() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = HeartbeatMonitor::start(ChannelId(3), &config(), Requester::new(tx));

        assert_eq!(rx.recv().await, Some(TimerRequest::SendProbe(ChannelId(3))));
        assert_eq!(rx.recv().await, Some(TimerRequest::SendProbe(ChannelId(3))));
        // 第二次探测已超时 (t=70 s)，应答在下一次探测之前到达。
        tokio::time::sleep(Duration::from_secs(15)).await;
        monitor.record_ack();

        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(TimerRequest::SendProbe(ChannelId(3))));
        }
        assert!(matches!(rx.recv().await, Some(TimerRequest::HealthCheckFailed { missed: 3, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_monitor_is_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = HeartbeatMonitor::start(ChannelId(4), &config(), Requester::new(tx));
        assert_eq!(monitor.channel_id(), ChannelId(4));
        monitor.stop();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(rx.try_recv().is_err());
    }
}
