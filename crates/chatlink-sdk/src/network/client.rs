//! 可重连的聊天 Socket 客户端
//!
//! - `connect(url)` 打开连接，入站帧分发到 `ChatStore`
//! - 非正常关闭（code != 1000）时经过 1s 防抖进入重连流程
//! - 重连间隔指数退避（3s 起，30s 封顶），最多 5 次，耗尽后进入终态
//! - `disconnect()` 以 1000 关闭，并取消所有挂起的重连定时器
//!
//! 所有失败都写入 `ChatStore` 的 error 字段，不向调用方抛出。

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backoff::ReconnectBackoff;
use super::frame::InboundFrame;
use super::{SocketConnector, SocketHandle, TransportEvent};
use crate::chat::ChatStore;
use crate::config::{ReconnectConfig, NORMAL_CLOSURE};
use crate::connection_state::{ConnectionState, ConnectionStatus};
use crate::error::{ChatLinkError, Result};
use crate::events::{ClientEvent, EventManager};
use crate::utils::Debouncer;

pub const ERR_PARSE_FAILED: &str = "Failed to parse incoming message";
pub const ERR_CONNECTION: &str = "WebSocket connection error";
pub const ERR_RECONNECT_EXHAUSTED: &str = "Failed to reconnect to chat server";
pub const ERR_NOT_CONNECTED: &str = "Not connected to chat server";
pub const ERR_SEND_FAILED: &str = "Failed to send message";
pub const DISCONNECT_REASON: &str = "User initiated disconnect";

/// 关闭事件之后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseDecision {
    Stay,
    Reconnect,
    Exhausted,
}

struct Connection {
    handle: Option<SocketHandle>,
    /// 当前连接的事件分发任务
    pump: Option<JoinHandle<()>>,
    /// 已经过防抖、正在等待退避间隔的重连任务
    pending_reconnect: Option<JoinHandle<()>>,
    /// 每次打开或主动断开都会递增，旧连接的事件据此丢弃
    generation: u64,
    backoff: ReconnectBackoff,
    state: ConnectionState,
}

struct ClientInner {
    connector: Arc<dyn SocketConnector>,
    store: Arc<ChatStore>,
    events: Arc<EventManager>,
    debouncer: Debouncer,
    conn: Mutex<Connection>,
}

/// 聊天 Socket 客户端
///
/// 需要在 tokio 运行时内使用。Drop 时自动断开。
pub struct SocketClient {
    inner: Arc<ClientInner>,
}

impl SocketClient {
    pub fn new(
        connector: Arc<dyn SocketConnector>,
        store: Arc<ChatStore>,
        events: Arc<EventManager>,
        config: ReconnectConfig,
    ) -> Self {
        let state = ConnectionState::new(config.initial_delay_ms, config.max_attempts);
        let inner = ClientInner {
            connector,
            store,
            events,
            debouncer: Debouncer::new(config.debounce()),
            conn: Mutex::new(Connection {
                handle: None,
                pump: None,
                pending_reconnect: None,
                generation: 0,
                backoff: ReconnectBackoff::new(config),
                state,
            }),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// 连接到 `url`
    ///
    /// 手动连接会取消挂起的重连并重置重连计数。
    pub fn connect(&self, url: &str) {
        self.inner.cancel_timers();
        self.inner.conn.lock().backoff.reset();
        self.inner.open(url);
    }

    /// 主动断开（关闭码 1000），不会触发重连
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// 发送消息；仅在连接打开时发送，失败时写入错误状态并返回 false
    pub fn send_message<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        self.inner.send_message(payload)
    }

    /// 发送消息，失败原因以错误返回，不写入错误状态
    ///
    /// 重连耗尽后返回 `ReconnectExhausted`，其余未连接情况返回 `NotConnected`。
    pub fn try_send_message<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        self.inner.try_send_message(payload)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.store.is_connected()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.store.is_loading()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.store.error()
    }

    pub fn store(&self) -> Arc<ChatStore> {
        self.inner.store.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.conn.lock().state.status
    }

    /// 连接状态快照
    pub fn connection_state(&self) -> ConnectionState {
        let conn = self.inner.conn.lock();
        let mut state = conn.state.clone();
        state.reconnect_attempts = conn.backoff.attempts();
        state.reconnect_delay_ms = conn.backoff.delay_ms();
        state
    }

    /// 是否有尚未执行的重连（防抖中或等待退避间隔）
    pub fn is_reconnect_pending(&self) -> bool {
        if self.inner.debouncer.is_pending() {
            return true;
        }
        self.inner
            .conn
            .lock()
            .pending_reconnect
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        let has_socket = self.inner.conn.lock().handle.is_some();
        if has_socket {
            self.inner.disconnect();
        } else {
            self.inner.cancel_timers();
        }
    }
}

impl ClientInner {
    fn open(self: &Arc<Self>, url: &str) {
        self.store.set_loading(true);
        self.store.set_error(None);

        let link = self.connector.open(url);
        let (generation, old_status, superseded, old_pump) = {
            let mut conn = self.conn.lock();
            conn.generation += 1;
            let superseded = conn.handle.replace(link.handle);
            let old_pump = conn.pump.take();
            let old_status = conn.state.status;
            conn.state.status = ConnectionStatus::Connecting;
            conn.state.url = Some(url.to_string());
            (conn.generation, old_status, superseded, old_pump)
        };

        // 重复 connect 时关闭旧连接，避免旧连接的关闭事件再触发重连
        if let Some(old) = superseded {
            old.close(NORMAL_CLOSURE, DISCONNECT_REASON);
        }
        if let Some(pump) = old_pump {
            pump.abort();
        }

        info!("正在连接聊天服务器: {} (generation={})", url, generation);
        self.emit_status(old_status, ConnectionStatus::Connecting);

        let inner = Arc::clone(self);
        let url = url.to_string();
        let mut events = link.events;
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                inner.handle_event(generation, &url, event);
            }
        });

        let mut conn = self.conn.lock();
        if conn.generation == generation {
            conn.pump = Some(pump);
        } else {
            pump.abort();
        }
    }

    fn handle_event(self: &Arc<Self>, generation: u64, url: &str, event: TransportEvent) {
        if self.conn.lock().generation != generation {
            debug!("丢弃过期连接的事件: generation={}", generation);
            return;
        }

        match event {
            TransportEvent::Open => self.on_open(url),
            TransportEvent::Text(text) => self.on_text(&text),
            TransportEvent::Error(reason) => self.on_transport_error(&reason),
            TransportEvent::Close { code, reason } => self.on_close(url, code, &reason),
        }
    }

    fn on_open(&self, url: &str) {
        let old_status = {
            let mut conn = self.conn.lock();
            conn.backoff.reset();
            let old = conn.state.status;
            conn.state.mark_connected();
            old
        };

        info!("✅ WebSocket 连接已建立: {}", url);
        self.store.set_connected(true);
        self.store.set_loading(false);
        self.store.set_error(None);
        self.emit_status(old_status, ConnectionStatus::Connected);
    }

    fn on_text(&self, text: &str) {
        self.conn.lock().state.record_received(text.len());

        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                error!("解析入站消息失败: {}", e);
                self.raise_error(ERR_PARSE_FAILED);
                return;
            }
        };

        match frame {
            InboundFrame::Message(message) => {
                if self.store.add_message(message.clone()) {
                    self.events.emit(ClientEvent::message_received(message));
                }
            }
            InboundFrame::Messages(messages) => {
                for message in messages {
                    if self.store.add_message(message.clone()) {
                        self.events.emit(ClientEvent::message_received(message));
                    }
                }
            }
            InboundFrame::Rooms(rooms) => {
                self.store.set_rooms(rooms.clone());
                self.events.emit(ClientEvent::rooms_updated(rooms));
            }
            InboundFrame::Error(message) => {
                warn!("服务端返回错误: {}", message);
                self.raise_error(&message);
            }
            InboundFrame::Unknown(frame_type) => {
                debug!("忽略未识别的入站帧类型: {:?}", frame_type);
            }
        }
    }

    fn on_transport_error(&self, reason: &str) {
        error!("WebSocket error: {}", reason);
        self.store.set_loading(false);
        self.raise_error(ERR_CONNECTION);
    }

    fn on_close(self: &Arc<Self>, url: &str, code: u16, reason: &str) {
        let (old_status, new_status, decision) = {
            let mut conn = self.conn.lock();
            let old = conn.state.status;
            debug!("{}", conn.state.summary());
            conn.state.mark_disconnected();

            let decision = if code == NORMAL_CLOSURE {
                CloseDecision::Stay
            } else if conn.backoff.can_retry() {
                CloseDecision::Reconnect
            } else {
                conn.state.status = ConnectionStatus::Failed;
                CloseDecision::Exhausted
            };
            (old, conn.state.status, decision)
        };

        info!("WebSocket 连接已关闭: code={}, reason={}", code, reason);
        self.store.set_connected(false);
        self.emit_status(old_status, new_status);

        match decision {
            CloseDecision::Stay => {}
            CloseDecision::Reconnect => self.schedule_reconnect(url),
            CloseDecision::Exhausted => self.fail_exhausted(),
        }
    }

    /// 防抖后进入重连流程；窗口内的多次关闭只触发一次
    fn schedule_reconnect(self: &Arc<Self>, url: &str) {
        let inner = Arc::clone(self);
        let url = url.to_string();
        self.debouncer.trigger(async move {
            inner.attempt_reconnect(&url);
        });
    }

    fn attempt_reconnect(self: &Arc<Self>, url: &str) {
        let mut conn = self.conn.lock();
        let delay = match conn.backoff.next_attempt() {
            Some(delay) => delay,
            None => {
                let old = conn.state.status;
                conn.state.status = ConnectionStatus::Failed;
                drop(conn);
                self.emit_status(old, ConnectionStatus::Failed);
                self.fail_exhausted();
                return;
            }
        };

        info!(
            "Attempting to reconnect ({}/{}) in {}ms",
            conn.backoff.attempts(),
            conn.backoff.max_attempts(),
            delay.as_millis()
        );

        let old_status = conn.state.status;
        conn.state.status = ConnectionStatus::Reconnecting;

        let inner = Arc::clone(self);
        let target = url.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.open(&target);
        });
        if let Some(previous) = conn.pending_reconnect.replace(task) {
            previous.abort();
        }
        drop(conn);

        self.emit_status(old_status, ConnectionStatus::Reconnecting);
    }

    fn fail_exhausted(&self) {
        error!("Max reconnection attempts reached");
        self.store.set_loading(false);
        self.raise_error(ERR_RECONNECT_EXHAUSTED);
    }

    fn disconnect(&self) {
        self.cancel_timers();

        let (old_status, handle, pump) = {
            let mut conn = self.conn.lock();
            conn.generation += 1;
            let old = conn.state.status;
            conn.state.mark_disconnected();
            (old, conn.handle.take(), conn.pump.take())
        };

        if let Some(handle) = handle {
            handle.close(NORMAL_CLOSURE, DISCONNECT_REASON);
        }
        if let Some(pump) = pump {
            pump.abort();
        }

        info!("WebSocket 已主动断开");
        self.store.set_connected(false);
        self.emit_status(old_status, ConnectionStatus::Disconnected);
    }

    /// 取消防抖中的重连和等待中的重连
    fn cancel_timers(&self) {
        if self.debouncer.cancel() {
            debug!("已取消防抖中的重连");
        }
        if let Some(task) = self.conn.lock().pending_reconnect.take() {
            task.abort();
        }
    }

    fn send_message<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        match self.try_send_message(payload) {
            Ok(()) => true,
            Err(e @ (ChatLinkError::NotConnected | ChatLinkError::ReconnectExhausted)) => {
                error!("WebSocket is not connected: {}", e);
                self.raise_error(ERR_NOT_CONNECTED);
                false
            }
            Err(e) => {
                error!("Error sending message: {}", e);
                self.raise_error(ERR_SEND_FAILED);
                false
            }
        }
    }

    fn try_send_message<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        let (handle, status) = {
            let conn = self.conn.lock();
            (conn.handle.clone(), conn.state.status)
        };
        let handle = match handle {
            Some(handle) if handle.is_open() => handle,
            _ if status == ConnectionStatus::Failed => {
                return Err(ChatLinkError::ReconnectExhausted)
            }
            _ => return Err(ChatLinkError::NotConnected),
        };

        let text = serde_json::to_string(payload)?;
        let byte_count = text.len();
        handle.send_text(text)?;
        self.conn.lock().state.record_sent(byte_count);
        Ok(())
    }

    fn raise_error(&self, message: &str) {
        self.store.set_error(Some(message.to_string()));
        self.events.emit(ClientEvent::error_raised(message));
    }

    fn emit_status(&self, old_status: ConnectionStatus, new_status: ConnectionStatus) {
        if old_status != new_status {
            self.events
                .emit(ClientEvent::connection_state_changed(old_status, new_status));
        }
    }
}
