//! SDK 入口
//!
//! 把配置接到各个组件上：
//! 存储 → 广播中心 / worker 运行环境 → 聊天状态与事件 → Socket 客户端。

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::chat::ChatStore;
use crate::config::ChatLinkConfig;
use crate::connection_state::ConnectionState;
use crate::error::{ChatLinkError, Result};
use crate::events::{ClientEvent, EventManager};
use crate::network::{SocketClient, SocketConnector, TungsteniteConnector};
use crate::storage::{MemoryStore, PersistentStore, SledStore};
use crate::sync::{SyncEnvironment, SyncFacade};
use crate::worker::{BroadcastHub, HeavyTask, ThreadSpawner, WorkerSpawner};

pub struct ChatLinkSDK {
    config: ChatLinkConfig,
    store: Arc<ChatStore>,
    events: Arc<EventManager>,
    storage: Arc<dyn PersistentStore>,
    hub: BroadcastHub,
    spawner: Arc<dyn WorkerSpawner>,
    socket: SocketClient,
}

impl ChatLinkSDK {
    /// 用默认组件初始化：tungstenite 传输、线程 worker，
    /// 配置了 `data_dir` 时使用 sled 存储，否则使用内存存储
    pub fn initialize(config: ChatLinkConfig) -> Result<Self> {
        info!("正在初始化 ChatLinkSDK v{}...", crate::version::SDK_VERSION);
        Self::validate_config(&config)?;

        let storage: Arc<dyn PersistentStore> = match &config.storage.data_dir {
            Some(dir) => Arc::new(SledStore::open(dir)?),
            None => {
                info!("未配置数据目录，使用内存存储");
                Arc::new(MemoryStore::new())
            }
        };

        Self::with_parts(
            config,
            Arc::new(TungsteniteConnector::new()),
            storage,
            BroadcastHub::new(),
            Arc::new(ThreadSpawner),
        )
    }

    /// 用指定组件初始化
    pub fn with_parts(
        config: ChatLinkConfig,
        connector: Arc<dyn SocketConnector>,
        storage: Arc<dyn PersistentStore>,
        hub: BroadcastHub,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Result<Self> {
        Self::validate_config(&config)?;

        let store = Arc::new(ChatStore::new());
        let events = Arc::new(EventManager::new(config.events.channel_capacity));
        let socket = SocketClient::new(
            connector,
            Arc::clone(&store),
            Arc::clone(&events),
            config.reconnect.clone(),
        );

        info!("✅ ChatLinkSDK 初始化完成");
        Ok(Self {
            config,
            store,
            events,
            storage,
            hub,
            spawner,
            socket,
        })
    }

    fn validate_config(config: &ChatLinkConfig) -> Result<()> {
        if let Some(url) = &config.server_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ChatLinkError::Config(format!(
                    "服务器地址必须是 ws:// 或 wss://: {}",
                    url
                )));
            }
        }

        let reconnect = &config.reconnect;
        if reconnect.backoff_multiplier == 0 {
            return Err(ChatLinkError::Config("退避倍数必须大于 0".to_string()));
        }
        if reconnect.initial_delay_ms > reconnect.max_delay_ms {
            return Err(ChatLinkError::Config(
                "初始重连间隔不能大于最大重连间隔".to_string(),
            ));
        }
        if config.events.channel_capacity == 0 {
            return Err(ChatLinkError::Config("事件通道容量必须大于 0".to_string()));
        }
        if config.sync.channel_name.is_empty() {
            return Err(ChatLinkError::Config("同步通道名不能为空".to_string()));
        }
        Ok(())
    }

    pub fn config(&self) -> &ChatLinkConfig {
        &self.config
    }

    /// 连接到配置中的服务器
    pub fn connect(&self) -> Result<()> {
        let url = self
            .config
            .server_url
            .as_deref()
            .ok_or_else(|| ChatLinkError::Config("未配置服务器地址".to_string()))?;
        self.socket.connect(url);
        Ok(())
    }

    /// 连接到指定服务器
    pub fn connect_to(&self, url: &str) {
        self.socket.connect(url);
    }

    pub fn disconnect(&self) {
        self.socket.disconnect();
    }

    pub fn send_message<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        self.socket.send_message(payload)
    }

    pub fn try_send_message<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        self.socket.try_send_message(payload)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.socket.connection_state()
    }

    pub fn socket(&self) -> &SocketClient {
        &self.socket
    }

    pub fn store(&self) -> Arc<ChatStore> {
        Arc::clone(&self.store)
    }

    pub fn events(&self) -> Arc<EventManager> {
        Arc::clone(&self.events)
    }

    /// 订阅 SDK 事件
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn storage(&self) -> Arc<dyn PersistentStore> {
        Arc::clone(&self.storage)
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn sync_environment(&self) -> SyncEnvironment {
        SyncEnvironment::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.spawner),
            self.config.sync.clone(),
        )
        .with_hub(self.hub.clone())
        .with_events(Arc::clone(&self.events))
    }

    /// 挂载 `key` 的同步数据（需要在 tokio 运行时内调用）
    pub fn use_sync(&self, key: &str) -> SyncFacade {
        SyncFacade::mount(&self.sync_environment(), key)
    }

    /// 创建重计算任务，调用方负责 `init_worker`
    pub fn heavy_task(&self) -> HeavyTask {
        HeavyTask::new(Arc::clone(&self.spawner), self.config.sync.request_timeout())
    }
}

impl std::fmt::Debug for ChatLinkSDK {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatLinkSDK")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("spawner", &self.spawner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::store::tests::message;
    use crate::network::test_helpers::{MockConnector, MockSocket};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn sdk_with_mock(config: ChatLinkConfig) -> (ChatLinkSDK, mpsc::UnboundedReceiver<MockSocket>) {
        let (connector, sockets) = MockConnector::new();
        let sdk = ChatLinkSDK::with_parts(
            config,
            connector,
            Arc::new(MemoryStore::new()),
            BroadcastHub::new(),
            Arc::new(ThreadSpawner),
        )
        .unwrap();
        (sdk, sockets)
    }

    #[test]
    fn test_config_validation() {
        let config = ChatLinkConfig::builder().server_url("http://chat.local").build();
        assert!(matches!(
            ChatLinkSDK::initialize(config),
            Err(ChatLinkError::Config(_))
        ));

        let mut config = ChatLinkConfig::default();
        config.reconnect.initial_delay_ms = 60_000;
        assert!(ChatLinkSDK::initialize(config).is_err());

        let config = ChatLinkConfig::builder().event_capacity(0).build();
        assert!(ChatLinkSDK::initialize(config).is_err());
    }

    #[test]
    fn test_initialize_with_data_dir_uses_sled() {
        let temp_dir = TempDir::new().unwrap();
        let config = ChatLinkConfig::builder().data_dir(temp_dir.path()).build();
        let sdk = ChatLinkSDK::initialize(config).unwrap();

        sdk.storage().set_item("token", "jwt").unwrap();
        assert!(temp_dir.path().join("kv").exists());
        assert_eq!(sdk.storage().get_item("token").unwrap().as_deref(), Some("jwt"));
    }

    #[tokio::test]
    async fn test_connect_requires_server_url() {
        let (sdk, _sockets) = sdk_with_mock(ChatLinkConfig::default());
        assert!(matches!(sdk.connect(), Err(ChatLinkError::Config(_))));
    }

    #[tokio::test]
    async fn test_messages_flow_into_store_and_events() {
        let config = ChatLinkConfig::builder()
            .server_url("ws://chat.local/ws")
            .build();
        let (sdk, mut sockets) = sdk_with_mock(config);
        let mut events = sdk.subscribe_events();

        sdk.connect().unwrap();
        let socket = sockets.recv().await.unwrap();
        socket.accept();
        let m1 = serde_json::to_value(message("m1", "r1", 10)).unwrap();
        socket.push_text(json!({"type": "message", "message": m1}).to_string());

        let mut received = None;
        while let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_secs(5), events.recv()).await
        {
            if let ClientEvent::MessageReceived { message, .. } = event {
                received = Some(message);
                break;
            }
        }
        assert_eq!(received.map(|m| m.id).as_deref(), Some("m1"));
        assert!(sdk.store().is_connected());
        assert_eq!(sdk.store().messages().len(), 1);
        assert_eq!(sdk.connection_state().stats.frames_received, 1);
    }

    #[tokio::test]
    async fn test_sync_facades_share_hub_and_storage() {
        let (sdk, _sockets) = sdk_with_mock(ChatLinkConfig::default());
        let tab_a = sdk.use_sync("prefs");
        let tab_b = sdk.use_sync("prefs");

        tab_a.update_data(json!({"theme": "dark"}));
        let mut rx = tab_b.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|v| v == &json!({"theme": "dark"})),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(
            sdk.storage().get_item("prefs").unwrap().as_deref(),
            Some(r#"{"theme":"dark"}"#)
        );
    }

    #[tokio::test]
    async fn test_heavy_task_from_sdk() {
        let (sdk, _sockets) = sdk_with_mock(ChatLinkConfig::default());
        let task = sdk.heavy_task();
        task.init_worker();
        let mut result = task.subscribe_result();
        task.process_data(json!(["b", "a"]));

        tokio::time::timeout(Duration::from_secs(5), result.wait_for(|v| !v.is_null()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.result(), json!(["a", "b"]));
    }
}
