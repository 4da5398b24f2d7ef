//! ChatLink SDK - 聊天客户端核心
//!
//! 本 SDK 提供：
//! - 🔗 可自动重连的聊天 Socket 客户端（指数退避 + 防抖）
//! - 💬 聊天状态存储：消息去重排序、房间列表、连接状态
//! - 🧵 后台 Worker：独立线程 + 消息通信，带 loading / error 状态跟踪
//! - 🔄 按 key 的数据同步：持久化缓存 + 跨实例广播
//! - ⚙️ 事件系统：统一的事件广播和回调
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use chatlink_sdk::{ChatLinkConfig, ChatLinkSDK};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ChatLinkConfig::builder()
//!         .server_url("wss://chat.example.com/ws")
//!         .data_dir("/path/to/data")
//!         .build();
//!
//!     let sdk = ChatLinkSDK::initialize(config)?;
//!     sdk.connect()?;
//!
//!     // 发送消息（未连接时返回 false，错误写入 store）
//!     sdk.send_message(&json!({"roomId": "general", "content": "Hello"}));
//!
//!     // 跨实例同步的偏好设置
//!     let prefs = sdk.use_sync("prefs");
//!     prefs.update_data(json!({"theme": "dark"}));
//!
//!     sdk.disconnect();
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod config;
pub mod connection_state;
pub mod error;
pub mod events;
pub mod network;
pub mod sdk;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod version;
pub mod worker;

pub use chat::{
    ChatMessage, ChatSnapshot, ChatStore, FileAttachment, MessageKind, MessageStatus, Room,
    RoomKind, SendMessageParams,
};
pub use config::{
    ChatLinkConfig, ChatLinkConfigBuilder, EventConfig, ReconnectConfig, StorageConfig,
    SyncConfig,
};
pub use connection_state::{ConnectionState, ConnectionStats, ConnectionStatus};
pub use error::{ChatLinkError, ErrorKind, Result};
pub use events::{ClientEvent, EventManager, EventStats};
pub use network::{
    InboundFrame, ReconnectBackoff, SocketClient, SocketConnector, TungsteniteConnector,
};
pub use sdk::ChatLinkSDK;
pub use storage::{MemoryStore, PersistentStore, SledStore};
pub use sync::{SyncEnvironment, SyncFacade};
pub use version::SDK_VERSION;
pub use worker::{
    BroadcastHub, HeavyTask, ThreadSpawner, UnsupportedSpawner, WorkerBridge, WorkerRequest,
    WorkerResponse, WorkerSpawner,
};
