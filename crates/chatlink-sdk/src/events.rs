//! 事件系统
//!
//! 连接状态、入站消息、房间列表、错误和同步数据更新都会以 `ClientEvent`
//! 的形式广播出去，UI 层通过 `subscribe()` 或监听器消费。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::chat::{ChatMessage, Room};
use crate::connection_state::ConnectionStatus;
use crate::utils::now_millis;

/// SDK 事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientEvent {
    /// 连接状态变更
    ConnectionStateChanged {
        old_status: ConnectionStatus,
        new_status: ConnectionStatus,
        timestamp: i64,
    },
    /// 收到消息（去重后真正插入的）
    MessageReceived {
        message: ChatMessage,
        timestamp: i64,
    },
    /// 房间列表被替换
    RoomsUpdated {
        rooms: Vec<Room>,
        timestamp: i64,
    },
    /// 错误状态更新
    ErrorRaised {
        message: String,
        timestamp: i64,
    },
    /// 同步数据更新（来自 Worker）
    SyncDataUpdated {
        key: String,
        data: Value,
        timestamp: i64,
    },
}

impl ClientEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::ConnectionStateChanged { .. } => "connection_state_changed",
            ClientEvent::MessageReceived { .. } => "message_received",
            ClientEvent::RoomsUpdated { .. } => "rooms_updated",
            ClientEvent::ErrorRaised { .. } => "error_raised",
            ClientEvent::SyncDataUpdated { .. } => "sync_data_updated",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            ClientEvent::ConnectionStateChanged { timestamp, .. }
            | ClientEvent::MessageReceived { timestamp, .. }
            | ClientEvent::RoomsUpdated { timestamp, .. }
            | ClientEvent::ErrorRaised { timestamp, .. }
            | ClientEvent::SyncDataUpdated { timestamp, .. } => *timestamp,
        }
    }

    pub fn connection_state_changed(old_status: ConnectionStatus, new_status: ConnectionStatus) -> Self {
        ClientEvent::ConnectionStateChanged {
            old_status,
            new_status,
            timestamp: now_millis(),
        }
    }

    pub fn message_received(message: ChatMessage) -> Self {
        ClientEvent::MessageReceived {
            message,
            timestamp: now_millis(),
        }
    }

    pub fn rooms_updated(rooms: Vec<Room>) -> Self {
        ClientEvent::RoomsUpdated {
            rooms,
            timestamp: now_millis(),
        }
    }

    pub fn error_raised<S: Into<String>>(message: S) -> Self {
        ClientEvent::ErrorRaised {
            message: message.into(),
            timestamp: now_millis(),
        }
    }

    pub fn sync_data_updated<S: Into<String>>(key: S, data: Value) -> Self {
        ClientEvent::SyncDataUpdated {
            key: key.into(),
            data,
            timestamp: now_millis(),
        }
    }
}

type EventListener = Box<dyn Fn(&ClientEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    pub last_event_time: Option<i64>,
}

/// 事件管理器
pub struct EventManager {
    sender: broadcast::Sender<ClientEvent>,
    /// 事件类型 -> 监听器；"*" 表示所有事件
    listeners: Arc<RwLock<HashMap<String, Vec<EventListener>>>>,
    stats: Arc<RwLock<EventStats>>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subscribers", &self.sender.receiver_count())
            .field("stats", &*self.stats.read())
            .finish()
    }
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub fn emit(&self, event: ClientEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 失败属正常场景
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read();
        for key in [event.event_type(), "*"] {
            if let Some(list) = listeners.get(key) {
                for listener in list {
                    listener(&event);
                }
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// 添加事件监听器（event_type 为 "*" 时监听所有事件）
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(Box::new(listener));
    }

    pub fn remove_listeners(&self, event_type: &str) {
        self.listeners.write().remove(event_type);
    }

    pub fn stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_emit_reaches_subscriber_and_listeners() {
        let manager = EventManager::new(16);
        let mut rx = manager.subscribe();

        let specific = Arc::new(AtomicU32::new(0));
        let wildcard = Arc::new(AtomicU32::new(0));
        let s = specific.clone();
        manager.add_listener("error_raised", move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        let w = wildcard.clone();
        manager.add_listener("*", move |_| {
            w.fetch_add(1, Ordering::SeqCst);
        });

        manager.emit(ClientEvent::error_raised("boom"));
        manager.emit(ClientEvent::sync_data_updated("prefs", serde_json::json!({"a": 1})));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type(), "error_raised");
        assert_eq!(specific.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard.load(Ordering::SeqCst), 2);

        let stats = manager.stats();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.events_by_type.get("sync_data_updated"), Some(&1));
    }

    #[test]
    fn test_emit_without_subscribers_does_not_fail() {
        let manager = EventManager::default();
        manager.emit(ClientEvent::connection_state_changed(
            ConnectionStatus::Idle,
            ConnectionStatus::Connecting,
        ));
        assert_eq!(manager.stats().total_events, 1);
        manager.remove_listeners("*");
    }
}
