//! 聊天状态：消息、房间与连接状态

pub mod store;
pub mod types;

pub use store::{ChatSnapshot, ChatStore};
pub use types::{ChatMessage, FileAttachment, MessageKind, MessageStatus, Room, RoomKind, SendMessageParams};
