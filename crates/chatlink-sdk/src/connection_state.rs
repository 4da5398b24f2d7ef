//! 连接状态
//!
//! 提供连接状态机的状态枚举和对外暴露的状态快照：
//! - 当前状态、服务器地址
//! - 重连次数与当前退避间隔
//! - 收发统计

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 连接状态
///
/// `Idle -> Connecting -> Connected -> Disconnected -> (Reconnecting -> Connecting)* -> Disconnected | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// 从未连接
    Idle,
    /// 连接中
    Connecting,
    /// 已连接
    Connected,
    /// 已断开
    Disconnected,
    /// 等待重连
    Reconnecting,
    /// 重连次数耗尽
    Failed,
}

impl ConnectionStatus {
    /// 是否为终态（不会再自动重连）
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionStatus::Failed)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Idle => write!(f, "未连接"),
            ConnectionStatus::Connecting => write!(f, "连接中"),
            ConnectionStatus::Connected => write!(f, "已连接"),
            ConnectionStatus::Disconnected => write!(f, "已断开"),
            ConnectionStatus::Reconnecting => write!(f, "重连中"),
            ConnectionStatus::Failed => write!(f, "连接失败"),
        }
    }
}

/// 收发统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// 最后活动时间（UTC毫秒时间戳）
    pub last_activity_time: Option<i64>,
}

/// 连接状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// 最近一次 connect 使用的地址
    pub url: Option<String>,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub stats: ConnectionStats,
    /// 连接建立时间（UTC毫秒时间戳）
    pub connected_at: Option<i64>,
    pub sdk_version: String,
}

impl ConnectionState {
    pub fn new(initial_delay_ms: u64, max_reconnect_attempts: u32) -> Self {
        Self {
            status: ConnectionStatus::Idle,
            url: None,
            reconnect_attempts: 0,
            reconnect_delay_ms: initial_delay_ms,
            max_reconnect_attempts,
            stats: ConnectionStats::default(),
            connected_at: None,
            sdk_version: crate::version::SDK_VERSION.to_string(),
        }
    }

    pub fn mark_connected(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.connected_at = Some(Utc::now().timestamp_millis());
    }

    pub fn mark_disconnected(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.connected_at = None;
    }

    pub fn record_sent(&mut self, byte_count: usize) {
        self.stats.frames_sent += 1;
        self.stats.bytes_sent += byte_count as u64;
        self.stats.last_activity_time = Some(Utc::now().timestamp_millis());
    }

    pub fn record_received(&mut self, byte_count: usize) {
        self.stats.frames_received += 1;
        self.stats.bytes_received += byte_count as u64;
        self.stats.last_activity_time = Some(Utc::now().timestamp_millis());
    }

    /// 获取连接持续时间（秒）
    pub fn connection_duration_secs(&self) -> Option<i64> {
        self.connected_at
            .map(|connected_at| (Utc::now().timestamp_millis() - connected_at) / 1000)
    }

    /// 生成状态摘要（用于日志打印）
    pub fn summary(&self) -> String {
        format!(
            "【连接状态】状态: {} | 服务器: {} | 重连: {}/{} | 下次间隔: {}ms | 发送{}帧/接收{}帧",
            self.status,
            self.url.as_deref().unwrap_or("-"),
            self.reconnect_attempts,
            self.max_reconnect_attempts,
            self.reconnect_delay_ms,
            self.stats.frames_sent,
            self.stats.frames_received,
        )
    }
}
