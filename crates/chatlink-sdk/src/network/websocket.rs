//! 基于 tokio-tungstenite 的 WebSocket 连接器
//!
//! 每条连接一个后台任务：先握手，再在同一个 select 循环里转发出站帧和入站帧。

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{
    socket_pair, OutgoingFrame, ReadyState, SocketConnector, SocketLink, TransportDriver,
    TransportEvent,
};

/// 异常关闭码（未收到关闭帧）
const ABNORMAL_CLOSURE: u16 = 1006;
/// 对端关闭帧未携带状态码
const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

impl SocketConnector for TungsteniteConnector {
    fn open(&self, url: &str) -> SocketLink {
        let (link, driver) = socket_pair();
        tokio::spawn(run_connection(url.to_string(), driver));
        link
    }
}

async fn run_connection(url: String, driver: TransportDriver) {
    let (emitter, mut outgoing) = driver.into_parts();

    let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!("WebSocket 握手失败: url={}, error={}", url, e);
            emitter.emit(TransportEvent::Error(e.to_string()));
            emitter.emit(TransportEvent::Close {
                code: ABNORMAL_CLOSURE,
                reason: e.to_string(),
            });
            return;
        }
    };

    let (mut sink, mut stream) = ws_stream.split();

    // 握手期间上层已经调用了 close
    if emitter.ready_state() == ReadyState::Closing {
        let _ = sink.close().await;
        emitter.emit(TransportEvent::Close {
            code: 1000,
            reason: String::new(),
        });
        return;
    }

    info!("WebSocket 握手完成: {}", url);
    emitter.emit(TransportEvent::Open);

    loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(OutgoingFrame::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!("WebSocket 发送失败: {}", e);
                        emitter.emit(TransportEvent::Error(e.to_string()));
                    }
                }
                Some(OutgoingFrame::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        debug!("发送关闭帧失败: {}", e);
                    }
                }
                None => {
                    // 所有句柄都已释放
                    let _ = sink.close().await;
                    emitter.emit(TransportEvent::Close { code: 1000, reason: String::new() });
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    emitter.emit(TransportEvent::Text(text.as_str().to_string()));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        emitter.emit(TransportEvent::Text(text));
                    }
                    Err(_) => debug!("忽略非 UTF-8 二进制帧: {} 字节", bytes.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    emitter.emit(TransportEvent::Close { code, reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket 读取失败: {}", e);
                    emitter.emit(TransportEvent::Error(e.to_string()));
                    emitter.emit(TransportEvent::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: e.to_string(),
                    });
                    break;
                }
                None => {
                    emitter.emit(TransportEvent::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    });
                    break;
                }
            }
        }
    }

    debug!("WebSocket 连接任务退出: {}", url);
}
