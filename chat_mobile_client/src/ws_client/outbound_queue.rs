// chat_mobile_client/src/ws_client/outbound_queue.rs

//! 有界 FIFO 出站队列。
//!
//! 通道未打开或发送失败时，出站消息暂存于此；通道打开后按入队顺序冲刷。
//! 队列满时淘汰最旧的一条，从不拒绝最新的消息。

use crate::config::QueueConfig;
use chat_websocket_utils::message::Envelope;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::VecDeque;

/// 队列中的一条待发送消息。
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub envelope: Envelope,
    pub enqueued_at: DateTime<Utc>,
    /// 已经失败的发送次数。
    pub attempts: u32,
}

/// 一次冲刷的统计。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    pub sent: usize,
    pub requeued: usize,
    pub dropped: usize,
}

#[derive(Debug)]
pub struct OutboundQueue {
    entries: VecDeque<QueuedMessage>,
    capacity: usize,
    max_attempts: u32,
}

impl OutboundQueue {
    pub fn new(capacity: usize, max_attempts: u32) -> Self {
        OutboundQueue { entries: VecDeque::with_capacity(capacity.min(1024)), capacity: capacity.max(1), max_attempts }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.capacity, config.max_attempts)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.entries.iter()
    }

    /// 入队一条新消息。队列已满时返回被淘汰的最旧消息。
    pub fn enqueue(&mut self, envelope: Envelope) -> Option<QueuedMessage> {
        self.enqueue_with_attempts(envelope, 0)
    }

    /// 入队一条已经失败过 `attempts` 次的消息。
    pub fn enqueue_with_attempts(&mut self, envelope: Envelope, attempts: u32) -> Option<QueuedMessage> {
        let evicted = if self.entries.len() >= self.capacity { self.entries.pop_front() } else { None };
        if let Some(oldest) = &evicted {
            warn!(
                "[出站队列] 队列已满 (容量 {})，淘汰最旧的消息 (类型: {}, id: {:?})",
                self.capacity, oldest.envelope.message_type, oldest.envelope.id
            );
        }
        self.entries.push_back(QueuedMessage { envelope, enqueued_at: Utc::now(), attempts });
        evicted
    }

    /// 只保留满足条件的消息，返回被移除的条数。
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&QueuedMessage) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|entry| keep(entry));
        before - self.entries.len()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// 按入队顺序尝试发送全部消息。
    ///
    /// 已失败 `max_attempts` 次的消息被丢弃；本次发送失败的消息失败计数加一后按原相对顺序重新入队。
    pub fn flush<F>(&mut self, mut send: F) -> FlushReport
    where
        F: FnMut(&Envelope) -> bool,
    {
        let mut report = FlushReport::default();
        let pending = std::mem::take(&mut self.entries);
        for mut entry in pending {
            if entry.attempts >= self.max_attempts {
                warn!(
                    "[出站队列] 消息已失败 {} 次，放弃发送 (类型: {}, id: {:?})",
                    entry.attempts, entry.envelope.message_type, entry.envelope.id
                );
                report.dropped += 1;
                continue;
            }
            if send(&entry.envelope) {
                report.sent += 1;
            } else {
                entry.attempts += 1;
                self.entries.push_back(entry);
                report.requeued += 1;
            }
        }
        if report != FlushReport::default() {
            debug!(
                "[出站队列] 冲刷完成: 发送 {} 条，重新入队 {} 条，丢弃 {} 条",
                report.sent, report.requeued, report.dropped
            );
        }
        report
    }
}
