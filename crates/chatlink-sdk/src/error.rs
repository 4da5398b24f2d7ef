use std::fmt;

/// 错误分类（供上层做程序化处理，展示用文案见 Display）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 传输层错误（可恢复，走重连路径）
    Transport,
    /// 协议错误（入站帧格式不合法，连接保持）
    Protocol,
    /// 重连次数耗尽（终态，需要手动重新连接）
    Exhausted,
    /// 运行环境不支持（Worker / 广播通道不可用）
    Capability,
    /// 持久化存储错误
    Storage,
    /// 序列化错误
    Serialization,
    /// 其他（配置错误等）
    Other,
}

#[derive(Debug)]
pub enum ChatLinkError {
    NotConnected,
    Transport(String),
    Protocol(String),
    ReconnectExhausted,
    WorkerUnsupported(String),
    WorkerTerminated,
    KvStore(String),
    Serialization(String),
    IO(String),
    Config(String),
}

impl fmt::Display for ChatLinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatLinkError::NotConnected => write!(f, "Not connected"),
            ChatLinkError::Transport(e) => write!(f, "Transport error: {}", e),
            ChatLinkError::Protocol(e) => write!(f, "Protocol error: {}", e),
            ChatLinkError::ReconnectExhausted => write!(f, "Reconnect attempts exhausted"),
            ChatLinkError::WorkerUnsupported(e) => write!(f, "Worker unsupported: {}", e),
            ChatLinkError::WorkerTerminated => write!(f, "Worker terminated"),
            ChatLinkError::KvStore(e) => write!(f, "KV store error: {}", e),
            ChatLinkError::Serialization(e) => write!(f, "Serialization error: {}", e),
            ChatLinkError::IO(e) => write!(f, "IO error: {}", e),
            ChatLinkError::Config(e) => write!(f, "Config error: {}", e),
        }
    }
}

impl std::error::Error for ChatLinkError {}

impl From<serde_json::Error> for ChatLinkError {
    fn from(error: serde_json::Error) -> Self {
        ChatLinkError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for ChatLinkError {
    fn from(error: std::io::Error) -> Self {
        ChatLinkError::IO(error.to_string())
    }
}

impl From<crate::network::TransportError> for ChatLinkError {
    fn from(error: crate::network::TransportError) -> Self {
        ChatLinkError::Transport(error.to_string())
    }
}

impl From<sled::Error> for ChatLinkError {
    fn from(error: sled::Error) -> Self {
        ChatLinkError::KvStore(error.to_string())
    }
}

impl ChatLinkError {
    /// 获取错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatLinkError::NotConnected | ChatLinkError::Transport(_) => ErrorKind::Transport,
            ChatLinkError::Protocol(_) => ErrorKind::Protocol,
            ChatLinkError::ReconnectExhausted => ErrorKind::Exhausted,
            ChatLinkError::WorkerUnsupported(_) | ChatLinkError::WorkerTerminated => {
                ErrorKind::Capability
            }
            ChatLinkError::KvStore(_) | ChatLinkError::IO(_) => ErrorKind::Storage,
            ChatLinkError::Serialization(_) => ErrorKind::Serialization,
            ChatLinkError::Config(_) => ErrorKind::Other,
        }
    }

    /// 判断是否可以通过重连恢复
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport)
    }
}

pub type Result<T> = std::result::Result<T, ChatLinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(ChatLinkError::NotConnected.kind(), ErrorKind::Transport);
        assert_eq!(ChatLinkError::ReconnectExhausted.kind(), ErrorKind::Exhausted);
        assert_eq!(
            ChatLinkError::WorkerUnsupported("threads".into()).kind(),
            ErrorKind::Capability
        );
        assert!(ChatLinkError::Transport("reset".into()).is_recoverable());
        assert!(!ChatLinkError::ReconnectExhausted.is_recoverable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let err: ChatLinkError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Serialization);
        assert!(err.to_string().starts_with("Serialization error"));
    }
}
