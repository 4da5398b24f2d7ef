//! SDK 配置
//!
//! 所有配置项都有与 Web 客户端一致的默认值，通过 `ChatLinkConfig::builder()` 覆盖。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 正常关闭码，收到后不再重连
pub const NORMAL_CLOSURE: u16 = 1000;

/// 默认的跨上下文同步频道名
pub const DEFAULT_SYNC_CHANNEL: &str = "app_sync";

/// 重连配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    /// 初始重连间隔（毫秒），连接成功后恢复为此值
    pub initial_delay_ms: u64,
    /// 最大重连间隔（毫秒）
    pub max_delay_ms: u64,
    /// 退避倍数
    pub backoff_multiplier: u64,
    /// 最大重连次数
    pub max_attempts: u32,
    /// 关闭事件的防抖窗口（毫秒）
    pub debounce_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 3000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2,
            max_attempts: 5,
            debounce_ms: 1000,
        }
    }
}

impl ReconnectConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// 广播频道名
    pub channel_name: String,
    /// Worker 请求超时；None 表示不设超时（请求无响应时保持 loading）
    pub request_timeout_ms: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_SYNC_CHANNEL.to_string(),
            request_timeout_ms: None,
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// 存储配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// 数据目录；None 时使用内存存储（进程退出即丢失）
    pub data_dir: Option<PathBuf>,
}

/// 事件配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventConfig {
    /// 广播通道容量
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// SDK 总配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatLinkConfig {
    /// 聊天服务器地址（ws:// 或 wss://）
    pub server_url: Option<String>,
    pub reconnect: ReconnectConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
    pub events: EventConfig,
}

impl ChatLinkConfig {
    pub fn builder() -> ChatLinkConfigBuilder {
        ChatLinkConfigBuilder::new()
    }
}

pub struct ChatLinkConfigBuilder {
    config: ChatLinkConfig,
}

impl ChatLinkConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ChatLinkConfig::default(),
        }
    }

    pub fn server_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.server_url = Some(url.into());
        self
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.storage.data_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    /// 设置最大重连次数
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect.max_attempts = attempts;
        self
    }

    pub fn sync_channel<S: Into<String>>(mut self, name: S) -> Self {
        self.config.sync.channel_name = name.into();
        self
    }

    /// 设置 Worker 请求超时
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.sync.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.events.channel_capacity = capacity;
        self
    }

    pub fn build(self) -> ChatLinkConfig {
        self.config
    }
}

impl Default for ChatLinkConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
