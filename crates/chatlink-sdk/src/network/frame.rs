//! 入站帧解析
//!
//! 线上格式：`{type: "message" | "messages" | "rooms" | "error", ...}`。
//! 未识别的 type（或没有 type 字段）解析为 `Unknown`，由调用方忽略。

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::chat::{ChatMessage, Room};
use crate::error::{ChatLinkError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// 单条消息
    Message(ChatMessage),
    /// 批量消息
    Messages(Vec<ChatMessage>),
    /// 房间列表（整体替换）
    Rooms(Vec<Room>),
    /// 服务端错误
    Error(String),
    /// 未识别的类型
    Unknown(Option<String>),
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ChatLinkError::Protocol(format!("入站帧不是合法 JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn from_value(mut value: Value) -> Result<Self> {
        let frame_type = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);

        match frame_type.as_deref() {
            Some("message") => Ok(InboundFrame::Message(take_field(&mut value, "message")?)),
            Some("messages") => Ok(InboundFrame::Messages(take_field(&mut value, "messages")?)),
            Some("rooms") => Ok(InboundFrame::Rooms(take_field(&mut value, "rooms")?)),
            Some("error") => {
                let message = match value.get("message") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => "Unknown server error".to_string(),
                    Some(other) => other.to_string(),
                };
                Ok(InboundFrame::Error(message))
            }
            _ => Ok(InboundFrame::Unknown(frame_type)),
        }
    }

    pub fn frame_type(&self) -> &str {
        match self {
            InboundFrame::Message(_) => "message",
            InboundFrame::Messages(_) => "messages",
            InboundFrame::Rooms(_) => "rooms",
            InboundFrame::Error(_) => "error",
            InboundFrame::Unknown(Some(t)) => t.as_str(),
            InboundFrame::Unknown(None) => "",
        }
    }
}

fn take_field<T: DeserializeOwned>(value: &mut Value, field: &str) -> Result<T> {
    let raw = value
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| ChatLinkError::Protocol(format!("缺少字段: {}", field)))?;
    serde_json::from_value(raw)
        .map_err(|e| ChatLinkError::Protocol(format!("字段 {} 格式错误: {}", field, e)))
}
