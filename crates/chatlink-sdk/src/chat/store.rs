//! 聊天状态存储
//!
//! 保存消息列表、房间列表、当前房间以及连接 / 加载 / 错误状态。
//! 消息按 id 或完全相同的 timestamp 去重，并始终按 timestamp 升序排列。

use parking_lot::RwLock;
use tracing::debug;

use super::types::{ChatMessage, Room};

#[derive(Debug, Clone, Default)]
pub struct ChatSnapshot {
    pub messages: Vec<ChatMessage>,
    pub rooms: Vec<Room>,
    pub current_room: Option<Room>,
    pub is_connected: bool,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// 聊天状态存储（线程安全）
#[derive(Debug, Default)]
pub struct ChatStore {
    state: RwLock<ChatSnapshot>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.write().is_connected = connected;
    }

    pub fn set_loading(&self, loading: bool) {
        self.state.write().is_loading = loading;
    }

    pub fn set_error(&self, message: Option<String>) {
        self.state.write().error = message;
    }

    pub fn clear_error(&self) {
        self.state.write().error = None;
    }

    /// 添加一条消息，返回是否真正插入（重复消息返回 false）
    pub fn add_message(&self, message: ChatMessage) -> bool {
        let mut state = self.state.write();
        let exists = state
            .messages
            .iter()
            .any(|m| m.id == message.id || m.timestamp == message.timestamp);
        if exists {
            debug!("🔄 忽略重复消息: id={}, timestamp={}", message.id, message.timestamp);
            return false;
        }

        state.messages.push(message);
        // 稳定排序，乱序到达的消息也能归位
        state.messages.sort_by_key(|m| m.timestamp);
        true
    }

    /// 批量添加，返回实际插入条数
    pub fn add_messages(&self, messages: Vec<ChatMessage>) -> usize {
        messages
            .into_iter()
            .map(|m| self.add_message(m))
            .filter(|inserted| *inserted)
            .count()
    }

    pub fn set_rooms(&self, rooms: Vec<Room>) {
        self.state.write().rooms = rooms;
    }

    pub fn set_current_room(&self, room: Option<Room>) {
        self.state.write().current_room = room;
    }

    pub fn clear_messages(&self) {
        self.state.write().messages.clear();
    }

    /// 当前房间的消息；没有选中房间时为空
    pub fn current_room_messages(&self) -> Vec<ChatMessage> {
        let state = self.state.read();
        match &state.current_room {
            Some(room) => state
                .messages
                .iter()
                .filter(|m| m.room_id == room.id)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn room_by_id(&self, id: &str) -> Option<Room> {
        self.state.read().rooms.iter().find(|r| r.id == id).cloned()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.read().messages.clone()
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.state.read().rooms.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().is_loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.state.read().clone()
    }
}
