// chat_mobile_client/src/ws_client/service.rs

//! 聊天客户端的会话控制器。
//!
//! `SessionController` 是一个可廉价克隆的句柄，背后是唯一一个 Tokio 后台任务（`SessionActor`）。
//! 该任务独占全部可变状态：当前会话、当前通道、连接状态、出站队列、消息处理器以及各类定时器。
//! 外部命令、通道事件与定时器请求分别经三条 mpsc 通道到达，并被逐条串行处理，
//! 因此“同一时刻至多一条活动通道”、“状态单调迁移”、“重复 connect 幂等”等约束无需全局锁即可成立。
//!
//! 只读的状态快照通过 `watch` 通道发布，供同步查询与 UI 订阅。

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::event::{ConnectHandlers, ConnectionStatus, HandlerId, MessageHandler, OpenCallback};
use crate::ws_client::heartbeat::HeartbeatMonitor;
use crate::ws_client::outbound_queue::OutboundQueue;
use crate::ws_client::reconnect::{ReconnectScheduler, ScheduleOutcome};
use crate::ws_client::timers::{Requester, TimerHandle, TimerRequest};
use chat_models::enums::ConnectionState;
use chat_models::ws_payloads::{ChatMessagePayload, CHAT_MESSAGE_TYPE};
use chat_websocket_utils::client::transport::NORMAL_CLOSURE;
use chat_websocket_utils::client::{
    build_room_url, Channel, ChannelEvent, ChannelEventKind, ChannelEventSender, ChannelId, Connector,
};
use chat_websocket_utils::error::WsError;
use chat_websocket_utils::message::Envelope;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// 切换房间时关闭旧通道使用的原因。
pub const ROOM_SWITCH_REASON: &str = "room switch";
/// 心跳连续超时后强制关闭通道使用的原因。
pub const HEALTH_CHECK_FAILED_REASON: &str = "health-check failed";
/// 心跳连续超时后强制关闭通道使用的关闭码（应用自定义区间）。
pub const HEALTH_CHECK_CLOSE_CODE: u16 = 4000;
/// 主动断开时使用的原因。
pub const MANUAL_DISCONNECT_REASON: &str = "manual disconnect";

enum Command {
    Connect { room_id: String, credential: String, handlers: ConnectHandlers },
    Send { envelope: Envelope, reply: oneshot::Sender<bool> },
    Disconnect { done: oneshot::Sender<()> },
    AddHandler { id: HandlerId, handler: MessageHandler },
    RemoveHandler { id: HandlerId },
}

/// 聊天实时连接的会话控制器句柄。
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    next_handler_id: Arc<AtomicU64>,
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController").field("status", &*self.status.borrow()).finish()
    }
}

impl SessionController {
    /// 创建控制器并启动其后台任务。必须在 Tokio 运行时内调用。
    ///
    /// 所有句柄都被丢弃后，后台任务会关闭当前通道、取消全部定时器并退出。
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());

        let actor = SessionActor {
            queue: OutboundQueue::from_config(&config.queue),
            scheduler: ReconnectScheduler::new(config.reconnect.clone()),
            config,
            connector,
            events_tx,
            requester: Requester::new(requests_tx),
            status_tx,
            state: ConnectionState::Idle,
            session: None,
            channel: None,
            next_channel_id: 0,
            manual_disconnect: false,
            switch: None,
            switch_generation: 0,
            handlers: BTreeMap::new(),
            heartbeat: None,
            last_error: None,
        };
        tokio::spawn(actor.run(commands_rx, events_rx, requests_rx));

        SessionController { commands: commands_tx, status: status_rx, next_handler_id: Arc::new(AtomicU64::new(1)) }
    }

    /// 连接到指定房间。
    ///
    /// 对同一 `(room_id, credential)` 重复调用不会建立第二条连接：已打开时本次的 `on_open` 立即触发，
    /// 正在连接时随即将到来的打开事件一起触发。绑定到其它房间时执行有序的平滑切换。
    /// 只有后台任务已退出时才返回错误。
    pub fn connect(
        &self,
        room_id: impl Into<String>,
        credential: impl Into<String>,
        handlers: ConnectHandlers,
    ) -> Result<(), ClientError> {
        self.commands
            .send(Command::Connect { room_id: room_id.into(), credential: credential.into(), handlers })
            .map_err(|_| ClientError::ActorStopped)
    }

    /// 发送一条消息。
    ///
    /// 返回 `true` 表示通道已接受；返回 `false` 表示消息已进入出站队列、尚未送达，并非错误。
    pub async fn send(&self, envelope: Envelope) -> bool {
        let (reply, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Send { envelope, reply }).is_err() {
            warn!("[会话控制器] 后台任务已停止，消息无法发送");
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// 以正文构造一条 `chat_message` 并发送到当前房间。
    pub async fn send_chat_message(&self, content: impl Into<String>) -> bool {
        match Envelope::new(CHAT_MESSAGE_TYPE, &ChatMessagePayload::text(content)) {
            Ok(envelope) => self.send(envelope).await,
            Err(e) => {
                error!("[会话控制器] 构造聊天消息失败: {}", e);
                false
            }
        }
    }

    /// 主动断开：取消全部定时器，正常关闭通道，清空会话与出站队列。可重复调用。
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (done, done_rx) = oneshot::channel();
        self.commands.send(Command::Disconnect { done }).map_err(|_| ClientError::ActorStopped)?;
        done_rx.await.map_err(|_| ClientError::ActorStopped)
    }

    /// 注册一个控制器级消息处理器，房间切换后依然有效。
    pub fn add_message_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::SeqCst));
        if self.commands.send(Command::AddHandler { id, handler: Arc::new(handler) }).is_err() {
            warn!("[会话控制器] 后台任务已停止，消息处理器 #{} 未注册", id.0);
        }
        id
    }

    pub fn remove_message_handler(&self, id: HandlerId) {
        let _ = self.commands.send(Command::RemoveHandler { id });
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    pub fn current_room(&self) -> Option<String> {
        self.status.borrow().room_id.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// 订阅连接状态快照。
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }
}

/// 一次会话：房间、凭证以及随 `connect` 传入的回调。
///
/// 同一会话上重复 `connect` 时，以最后一次传入的回调为准；被替换掉的 `on_open`
/// 仍欠一次打开通知，暂存在 `pending_opens` 中，下一次打开时触发一次后清空。
struct Session {
    room_id: String,
    credential: String,
    handlers: ConnectHandlers,
    pending_opens: Vec<OpenCallback>,
}

impl Session {
    fn new(room_id: String, credential: String, handlers: ConnectHandlers) -> Self {
        Session { room_id, credential, handlers, pending_opens: Vec::new() }
    }

    fn matches(&self, room_id: &str, credential: &str) -> bool {
        self.room_id == room_id && self.credential == credential
    }

    /// 以新回调替换当前回调。`owes_open` 为真时，旧的 `on_open` 留待下一次打开触发。
    fn replace_handlers(&mut self, handlers: ConnectHandlers, owes_open: bool) {
        let previous = std::mem::replace(&mut self.handlers, handlers);
        if owes_open {
            self.pending_opens.extend(previous.on_open);
        }
    }

    fn notify_open(&mut self) {
        for callback in self.pending_opens.drain(..) {
            invoke_open(&callback);
        }
        if let Some(callback) = &self.handlers.on_open {
            invoke_open(callback);
        }
    }

    fn notify_close(&self, code: Option<u16>, reason: &str) {
        if let Some(callback) = &self.handlers.on_close {
            invoke_guarded("on_close 回调", || {
                callback(code, reason);
                Ok(())
            });
        }
    }

    fn notify_error(&self, error: &ClientError) {
        if let Some(callback) = &self.handlers.on_error {
            invoke_guarded("on_error 回调", || {
                callback(error);
                Ok(())
            });
        }
    }

    fn dispatch(&self, envelope: &Envelope) {
        if let Some(handler) = &self.handlers.on_message {
            invoke_guarded("on_message 回调", || handler(envelope));
        }
    }
}

fn invoke_open(callback: &OpenCallback) {
    invoke_guarded("on_open 回调", || {
        callback();
        Ok(())
    });
}

/// 调用一个外部回调，隔离其返回的错误与 panic。
fn invoke_guarded<F>(label: &str, callback: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("[会话控制器] {}", ClientError::HandlerFailed(format!("{}: {:#}", label, e))),
        Err(_) => error!("[会话控制器] {} 发生 panic，已隔离，其余处理器继续执行", label),
    }
}

/// 进行中的房间切换。
struct PendingSwitch {
    generation: u64,
    /// 正在关闭的旧通道。
    closing: ChannelId,
    /// 旧通道在切换开始时是否已打开；只有已打开的通道才向旧会话补发 `on_close`。
    was_open: bool,
    /// 切换目标，切换进行中再次 `connect` 时被整体替换。
    target: Session,
    _grace: TimerHandle,
}

struct SessionActor {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    events_tx: ChannelEventSender,
    requester: Requester,
    status_tx: watch::Sender<ConnectionStatus>,

    state: ConnectionState,
    session: Option<Session>,
    channel: Option<Box<dyn Channel>>,
    next_channel_id: u64,
    manual_disconnect: bool,
    switch: Option<PendingSwitch>,
    switch_generation: u64,

    queue: OutboundQueue,
    handlers: BTreeMap<HandlerId, MessageHandler>,
    heartbeat: Option<HeartbeatMonitor>,
    scheduler: ReconnectScheduler,
    last_error: Option<String>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
        mut requests: mpsc::UnboundedReceiver<TimerRequest>,
    ) {
        info!("[会话控制器] 后台任务已启动");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_channel_event(event),
                Some(request) = requests.recv() => self.handle_timer_request(request),
            }
        }
        self.shutdown();
        info!("[会话控制器] 所有句柄已释放，后台任务退出");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { room_id, credential, handlers } => self.handle_connect(room_id, credential, handlers),
            Command::Send { envelope, reply } => {
                let accepted = self.handle_send(envelope);
                let _ = reply.send(accepted);
            }
            Command::Disconnect { done } => {
                self.handle_disconnect();
                let _ = done.send(());
            }
            Command::AddHandler { id, handler } => {
                debug!("[会话控制器] 注册消息处理器 #{}", id.0);
                self.handlers.insert(id, handler);
            }
            Command::RemoveHandler { id } => {
                if self.handlers.remove(&id).is_some() {
                    debug!("[会话控制器] 移除消息处理器 #{}", id.0);
                }
            }
        }
    }

    fn handle_connect(&mut self, room_id: String, credential: String, handlers: ConnectHandlers) {
        self.manual_disconnect = false;

        if let Some(switch) = self.switch.as_mut() {
            info!(
                "[会话控制器] 房间切换进行中，待切换目标由 {} 更新为 {}",
                switch.target.room_id, room_id
            );
            switch.target = Session::new(room_id, credential, handlers);
            return;
        }

        match self.session.as_mut() {
            Some(session) if session.matches(&room_id, &credential) => match self.state {
                ConnectionState::Open => {
                    info!("[会话控制器] 已连接到房间 {}，忽略重复的 connect", room_id);
                    if let Some(callback) = &handlers.on_open {
                        invoke_open(callback);
                    }
                    session.replace_handlers(handlers, false);
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    debug!("[会话控制器] 房间 {} 正在连接，以本次 connect 的回调为准", room_id);
                    session.replace_handlers(handlers, true);
                }
                ConnectionState::Idle | ConnectionState::Closing => {
                    session.replace_handlers(handlers, false);
                    self.scheduler.reset();
                    self.last_error = None;
                    self.open_channel();
                }
            },
            Some(_) => self.begin_switch(Session::new(room_id, credential, handlers)),
            None => {
                self.session = Some(Session::new(room_id, credential, handlers));
                self.scheduler.reset();
                self.last_error = None;
                self.open_channel();
            }
        }
    }

    /// 当前发送目标房间：切换进行中时为切换目标。
    fn target_room(&self) -> Option<&str> {
        match &self.switch {
            Some(switch) => Some(switch.target.room_id.as_str()),
            None => self.session.as_ref().map(|s| s.room_id.as_str()),
        }
    }

    fn handle_send(&mut self, mut envelope: Envelope) -> bool {
        if envelope.room_id.is_none() {
            envelope.room_id = self.target_room().map(str::to_owned);
        }
        envelope.ensure_id();

        if self.state == ConnectionState::Open {
            if let Some(channel) = &self.channel {
                if channel.send(&envelope) {
                    return true;
                }
                warn!("[会话控制器] 通道拒绝发送，消息转入出站队列 (id: {:?})", envelope.id);
                self.queue.enqueue_with_attempts(envelope, 1);
                return false;
            }
        }

        debug!(
            "[会话控制器] 通道未打开 (状态: {})，消息入队 (类型: {}, id: {:?})",
            self.state, envelope.message_type, envelope.id
        );
        self.queue.enqueue(envelope);
        false
    }

    fn handle_disconnect(&mut self) {
        self.manual_disconnect = true;
        self.switch = None;
        self.scheduler.reset();
        self.stop_heartbeat();

        let had_channel = match self.channel.take() {
            Some(channel) => {
                info!("[会话控制器] 主动断开，正常关闭通道 {}", channel.id());
                channel.close(NORMAL_CLOSURE, MANUAL_DISCONNECT_REASON);
                true
            }
            None => false,
        };
        if let Some(session) = self.session.take() {
            if had_channel {
                session.notify_close(Some(NORMAL_CLOSURE), MANUAL_DISCONNECT_REASON);
            }
            info!("[会话控制器] 已解除房间 {} 的会话绑定", session.room_id);
        }
        let dropped = self.queue.clear();
        if dropped > 0 {
            info!("[会话控制器] 主动断开，丢弃出站队列中的 {} 条消息", dropped);
        }
        self.last_error = None;
        self.set_state(ConnectionState::Idle);
    }

    fn begin_switch(&mut self, target: Session) {
        let from = self.session.as_ref().map(|s| s.room_id.clone()).unwrap_or_default();
        info!("[会话控制器] 开始从房间 {} 平滑切换到房间 {}", from, target.room_id);

        self.scheduler.reset();
        self.stop_heartbeat();

        let closing = match self.channel.as_ref() {
            Some(channel) => {
                channel.close(NORMAL_CLOSURE, ROOM_SWITCH_REASON);
                channel.id()
            }
            None => {
                // 旧通道已经关闭，关闭通知早已发出。
                self.complete_switch(target, None);
                return;
            }
        };
        let was_open = self.state == ConnectionState::Open;

        self.switch_generation += 1;
        let generation = self.switch_generation;
        let grace = self.config.switch_grace();
        let requester = self.requester.clone();
        let timer = TimerHandle::spawn("switch-grace", async move {
            tokio::time::sleep(grace).await;
            requester.request(TimerRequest::SwitchGraceElapsed { generation });
        });
        self.switch = Some(PendingSwitch { generation, closing, was_open, target, _grace: timer });
        self.set_state(ConnectionState::Closing);
    }

    /// 完成切换。`closed` 为旧通道的关闭码与原因，`None` 表示不再通知旧会话。
    fn complete_switch(&mut self, target: Session, closed: Option<(Option<u16>, &str)>) {
        self.channel = None;
        self.stop_heartbeat();
        let previous = self.session.take();
        if let (Some(previous), Some((code, reason))) = (previous, closed) {
            previous.notify_close(code, reason);
        }

        let discarded = self
            .queue
            .retain(|entry| entry.envelope.room_id.as_deref().map_or(true, |room| room == target.room_id));
        if discarded > 0 {
            info!("[会话控制器] 丢弃 {} 条属于旧房间的待发送消息", discarded);
        }

        self.scheduler.reset();
        self.last_error = None;
        info!("[会话控制器] 房间切换完成，开始连接房间 {}", target.room_id);
        self.session = Some(target);
        self.open_channel();
    }

    fn open_channel(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let url = match build_room_url(&self.config.ws_url, &session.credential, &session.room_id) {
            Ok(url) => url,
            Err(e) => {
                error!("[会话控制器] 无法构造房间 {} 的连接 URL: {}", session.room_id, e);
                let err = ClientError::InvalidEndpoint(e.to_string());
                session.notify_error(&err);
                self.last_error = Some(err.to_string());
                self.set_state(ConnectionState::Idle);
                return;
            }
        };

        self.next_channel_id += 1;
        let channel_id = ChannelId(self.next_channel_id);
        info!("[会话控制器] 为房间 {} 打开通道 {}", session.room_id, channel_id);
        self.channel = Some(self.connector.open(url, channel_id, self.events_tx.clone()));
        self.set_state(ConnectionState::Connecting);
    }

    fn current_channel_id(&self) -> Option<ChannelId> {
        self.channel.as_ref().map(|channel| channel.id())
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        let ChannelEvent { channel_id, kind } = event;

        if self.switch.as_ref().map(|s| s.closing) == Some(channel_id) {
            match kind {
                ChannelEventKind::Closed { code, reason } => {
                    if let Some(switch) = self.switch.take() {
                        debug!("[会话控制器] 旧通道 {} 已关闭，继续房间切换", channel_id);
                        let closed = switch.was_open.then_some((code, reason.as_str()));
                        self.complete_switch(switch.target, closed);
                    }
                }
                other => debug!("[会话控制器] 切换中，丢弃旧通道 {} 的事件: {:?}", channel_id, other),
            }
            return;
        }

        if self.current_channel_id() != Some(channel_id) {
            debug!("[会话控制器] 忽略过期通道 {} 的事件: {:?}", channel_id, kind);
            return;
        }

        match kind {
            ChannelEventKind::Opened => self.on_opened(channel_id),
            ChannelEventKind::Message(envelope) => self.dispatch(envelope),
            ChannelEventKind::HeartbeatAck => {
                if let Some(heartbeat) = &self.heartbeat {
                    heartbeat.record_ack();
                }
            }
            ChannelEventKind::Error(info) => {
                warn!("[会话控制器] 通道 {} 报告错误: {}", channel_id, info);
                let err = ClientError::Transport(WsError::Message(info));
                self.last_error = Some(err.to_string());
                if let Some(session) = &self.session {
                    session.notify_error(&err);
                }
                self.publish();
            }
            ChannelEventKind::Closed { code, reason } => self.on_closed(channel_id, code, reason),
        }
    }

    fn on_opened(&mut self, channel_id: ChannelId) {
        info!("[会话控制器] 通道 {} 已打开", channel_id);
        self.state = ConnectionState::Open;
        self.last_error = None;
        self.heartbeat = Some(HeartbeatMonitor::start(channel_id, &self.config.heartbeat, self.requester.clone()));
        self.scheduler.start_stability_window(channel_id, &self.requester);

        if let Some(channel) = &self.channel {
            if !self.queue.is_empty() {
                let report = self.queue.flush(|envelope| channel.send(envelope));
                info!(
                    "[会话控制器] 出站队列已冲刷: 发送 {} 条，重新入队 {} 条，丢弃 {} 条",
                    report.sent, report.requeued, report.dropped
                );
            }
        }

        self.publish();
        if let Some(session) = self.session.as_mut() {
            session.notify_open();
        }
    }

    fn dispatch(&self, envelope: Envelope) {
        if envelope.is_reserved() {
            debug!("[会话控制器] 保留类型 {} 不派发给订阅者", envelope.message_type);
            return;
        }
        let Some(session) = &self.session else {
            return;
        };
        if let Some(room) = envelope.room_id.as_deref() {
            if room != session.room_id {
                warn!(
                    "[会话控制器] 丢弃不属于当前房间的消息 (消息房间: {}, 当前房间: {})",
                    room, session.room_id
                );
                return;
            }
        }
        for (id, handler) in &self.handlers {
            invoke_guarded(&format!("消息处理器 #{}", id.0), || handler(&envelope));
        }
        session.dispatch(&envelope);
    }

    fn on_closed(&mut self, channel_id: ChannelId, code: Option<u16>, reason: String) {
        self.channel = None;
        self.stop_heartbeat();
        self.scheduler.stop_stability_window();

        if self.manual_disconnect {
            self.set_state(ConnectionState::Idle);
            return;
        }
        if let Some(session) = &self.session {
            session.notify_close(code, &reason);
        }

        if code == Some(NORMAL_CLOSURE) {
            info!("[会话控制器] 通道 {} 被服务端正常关闭 ({})，不重连", channel_id, reason);
            self.set_state(ConnectionState::Idle);
        } else {
            warn!("[会话控制器] 通道 {} 非预期关闭 (code: {:?}, reason: {})", channel_id, code, reason);
            if self.last_error.is_none() {
                self.last_error = Some(format!("连接非预期关闭 (code: {:?}, reason: {})", code, reason));
            }
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let Some(room_id) = self.session.as_ref().map(|s| s.room_id.clone()) else {
            self.set_state(ConnectionState::Idle);
            return;
        };
        if self.manual_disconnect {
            self.set_state(ConnectionState::Idle);
            return;
        }
        match self.scheduler.schedule(&self.requester) {
            ScheduleOutcome::Scheduled { .. } => self.set_state(ConnectionState::Reconnecting),
            ScheduleOutcome::Exhausted { attempts } => {
                let err = ClientError::ReconnectExhausted { room_id, attempts };
                error!("[会话控制器] {}", err);
                self.last_error = Some(err.to_string());
                self.set_state(ConnectionState::Idle);
                if let Some(session) = &self.session {
                    session.notify_error(&err);
                }
            }
        }
    }

    fn handle_timer_request(&mut self, request: TimerRequest) {
        match request {
            TimerRequest::SendProbe(channel_id) => match &self.channel {
                Some(channel) if channel.id() == channel_id && self.state == ConnectionState::Open => {
                    if !channel.send(&Envelope::heartbeat()) {
                        debug!("[会话控制器] 通道 {} 拒绝心跳探测", channel_id);
                    }
                }
                _ => debug!("[会话控制器] 忽略过期的心跳探测请求 ({})", channel_id),
            },
            TimerRequest::HealthCheckFailed { channel_id, missed } => {
                if self.current_channel_id() != Some(channel_id) {
                    debug!("[会话控制器] 忽略过期的健康检查失败请求 ({})", channel_id);
                    return;
                }
                warn!("[会话控制器] 通道 {} 连续 {} 次心跳未应答，强制关闭", channel_id, missed);
                self.stop_heartbeat();
                self.scheduler.stop_stability_window();
                if let Some(channel) = self.channel.take() {
                    channel.close(HEALTH_CHECK_CLOSE_CODE, HEALTH_CHECK_FAILED_REASON);
                }
                let err = ClientError::HealthCheckFailed { missed };
                self.last_error = Some(err.to_string());
                if let Some(session) = &self.session {
                    session.notify_error(&err);
                    session.notify_close(Some(HEALTH_CHECK_CLOSE_CODE), HEALTH_CHECK_FAILED_REASON);
                }
                self.schedule_reconnect();
            }
            TimerRequest::Reconnect { generation } => {
                if !self.scheduler.take_due(generation) {
                    return;
                }
                if self.manual_disconnect || self.switch.is_some() || self.channel.is_some() {
                    debug!("[会话控制器] 重连条件已不满足，跳过本次重连");
                    return;
                }
                info!("[会话控制器] 执行第 {} 次重连", self.scheduler.attempts());
                self.open_channel();
            }
            TimerRequest::StabilityReached(channel_id) => {
                if self.current_channel_id() == Some(channel_id) && self.state == ConnectionState::Open {
                    self.scheduler.on_stable();
                    self.publish();
                }
            }
            TimerRequest::SwitchGraceElapsed { generation } => {
                if self.switch.as_ref().map(|s| s.generation) != Some(generation) {
                    return;
                }
                if let Some(switch) = self.switch.take() {
                    warn!("[会话控制器] 旧通道 {} 未在宽限期内完成关闭，直接切换", switch.closing);
                    let closed = switch.was_open.then_some((None, ROOM_SWITCH_REASON));
                    self.complete_switch(switch.target, closed);
                }
            }
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("[会话控制器] 状态迁移: {} -> {}", self.state, state);
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        let status = ConnectionStatus {
            state: self.state,
            room_id: self.session.as_ref().map(|s| s.room_id.clone()),
            reconnect_attempt: self.scheduler.attempts(),
            last_error: self.last_error.clone(),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn shutdown(&mut self) {
        self.switch = None;
        self.scheduler.reset();
        self.stop_heartbeat();
        if let Some(channel) = self.channel.take() {
            channel.close(NORMAL_CLOSURE, MANUAL_DISCONNECT_REASON);
        }
        self.session = None;
        self.state = ConnectionState::Idle;
        self.publish();
    }
}
