//! 网络层
//!
//! `SocketConnector` 负责打开一条传输连接，它立即返回 `SocketLink`：
//! 握手结果和后续入站数据都通过事件通道异步送达（Open / Text / Error / Close），
//! 与浏览器 WebSocket 的回调语义一致。

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod backoff;
pub mod client;
pub mod frame;
pub mod websocket;

pub use backoff::ReconnectBackoff;
pub use client::SocketClient;
pub use frame::InboundFrame;
pub use websocket::TungsteniteConnector;

/// 传输层事件
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// 连接建立
    Open,
    /// 收到文本帧
    Text(String),
    /// 传输错误（不代表连接已关闭）
    Error(String),
    /// 连接关闭
    Close { code: u16, reason: String },
}

/// 连接就绪状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// 出站帧
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// 传输层错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("连接未打开: {0:?}")]
    NotOpen(ReadyState),

    #[error("传输通道已关闭")]
    ChannelClosed,
}

/// 连接句柄（可克隆，只负责出站方向）
#[derive(Debug, Clone)]
pub struct SocketHandle {
    outgoing: mpsc::UnboundedSender<OutgoingFrame>,
    ready_state: Arc<AtomicU8>,
}

impl SocketHandle {
    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// 发送文本帧，仅在 Open 状态下可用
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        let state = self.ready_state();
        if state != ReadyState::Open {
            return Err(TransportError::NotOpen(state));
        }
        self.outgoing
            .send(OutgoingFrame::Text(text))
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// 发起关闭握手；重复调用无副作用
    pub fn close(&self, code: u16, reason: &str) {
        let previous = self.ready_state.swap(ReadyState::Closing as u8, Ordering::SeqCst);
        if ReadyState::from_u8(previous) == ReadyState::Closed {
            self.ready_state.store(ReadyState::Closed as u8, Ordering::SeqCst);
            return;
        }
        if ReadyState::from_u8(previous) == ReadyState::Closing {
            return;
        }
        let _ = self.outgoing.send(OutgoingFrame::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// `open()` 的返回值：出站句柄 + 入站事件流
#[derive(Debug)]
pub struct SocketLink {
    pub handle: SocketHandle,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// 事件发送端（传输实现用来上报 Open / Text / Error / Close）
#[derive(Debug, Clone)]
pub struct TransportEmitter {
    events: mpsc::UnboundedSender<TransportEvent>,
    ready_state: Arc<AtomicU8>,
}

impl TransportEmitter {
    /// 投递事件并同步就绪状态，接收方已关闭时返回 false
    pub fn emit(&self, event: TransportEvent) -> bool {
        match &event {
            TransportEvent::Open => self.set_ready_state(ReadyState::Open),
            TransportEvent::Close { .. } => self.set_ready_state(ReadyState::Closed),
            _ => {}
        }
        self.events.send(event).is_ok()
    }

    pub fn set_ready_state(&self, state: ReadyState) {
        self.ready_state.store(state as u8, Ordering::SeqCst);
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::SeqCst))
    }
}

/// 传输实现侧持有的另一端
#[derive(Debug)]
pub struct TransportDriver {
    emitter: TransportEmitter,
    outgoing: mpsc::UnboundedReceiver<OutgoingFrame>,
}

impl TransportDriver {
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.emitter.emit(event)
    }

    pub fn ready_state(&self) -> ReadyState {
        self.emitter.ready_state()
    }

    pub async fn next_outgoing(&mut self) -> Option<OutgoingFrame> {
        self.outgoing.recv().await
    }

    pub fn try_next_outgoing(&mut self) -> Option<OutgoingFrame> {
        self.outgoing.try_recv().ok()
    }

    /// 拆分为事件发送端和出站帧接收端
    pub fn into_parts(self) -> (TransportEmitter, mpsc::UnboundedReceiver<OutgoingFrame>) {
        (self.emitter, self.outgoing)
    }
}

/// 创建一对相连的 `SocketLink` / `TransportDriver`，初始状态为 Connecting
pub fn socket_pair() -> (SocketLink, TransportDriver) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let ready_state = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));

    let link = SocketLink {
        handle: SocketHandle {
            outgoing: outgoing_tx,
            ready_state: ready_state.clone(),
        },
        events: events_rx,
    };
    let driver = TransportDriver {
        emitter: TransportEmitter {
            events: events_tx,
            ready_state,
        },
        outgoing: outgoing_rx,
    };
    (link, driver)
}

/// 传输连接器
pub trait SocketConnector: Send + Sync + fmt::Debug {
    /// 打开到 `url` 的连接；立即返回，握手结果通过事件送达
    ///
    /// 需要在 tokio 运行时内调用。
    fn open(&self, url: &str) -> SocketLink;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_sends_only_when_open() {
        let (link, mut driver) = socket_pair();
        assert_eq!(link.handle.ready_state(), ReadyState::Connecting);
        assert_eq!(
            link.handle.send_text("early".into()),
            Err(TransportError::NotOpen(ReadyState::Connecting))
        );

        driver.emit(TransportEvent::Open);
        assert!(link.handle.is_open());
        link.handle.send_text("hello".into()).unwrap();
        assert_eq!(
            driver.next_outgoing().await,
            Some(OutgoingFrame::Text("hello".into()))
        );
    }

    #[tokio::test]
    async fn test_close_is_sent_once() {
        let (link, mut driver) = socket_pair();
        driver.emit(TransportEvent::Open);

        link.handle.close(1000, "bye");
        link.handle.close(1000, "bye again");
        assert_eq!(link.handle.ready_state(), ReadyState::Closing);
        assert_eq!(
            driver.try_next_outgoing(),
            Some(OutgoingFrame::Close {
                code: 1000,
                reason: "bye".into()
            })
        );
        assert_eq!(driver.try_next_outgoing(), None);

        driver.emit(TransportEvent::Close {
            code: 1000,
            reason: "bye".into(),
        });
        assert_eq!(link.handle.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn test_close_after_closed_stays_closed() {
        let (link, mut driver) = socket_pair();
        driver.emit(TransportEvent::Close {
            code: 1006,
            reason: String::new(),
        });
        link.handle.close(1000, "late");
        assert_eq!(link.handle.ready_state(), ReadyState::Closed);
        assert_eq!(driver.try_next_outgoing(), None);
    }
}
