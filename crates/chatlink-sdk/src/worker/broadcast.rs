//! 跨实例广播
//!
//! 按名字分组的广播通道：同名通道上 `post_message` 的消息投递给除自己以外的
//! 所有订阅者。一个 `BroadcastHub` 代表一个"源"，同一个 hub 上的所有
//! 同步 worker 互相可见。

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct HubInner {
    channels: Mutex<HashMap<String, Vec<(u64, Sender<Value>)>>>,
    next_id: AtomicU64,
}

/// 广播中心
#[derive(Debug, Clone, Default)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入名为 `name` 的通道
    pub fn channel(&self, name: &str) -> BroadcastChannel {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = unbounded();
        self.inner
            .channels
            .lock()
            .entry(name.to_string())
            .or_default()
            .push((id, tx));

        debug!("加入广播通道: name={}, id={}", name, id);
        BroadcastChannel {
            id,
            name: name.to_string(),
            hub: Arc::clone(&self.inner),
            receiver: rx,
        }
    }

    /// 通道当前的订阅者数量
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.inner
            .channels
            .lock()
            .get(name)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// 广播通道的一个端点，Drop 时自动退出
#[derive(Debug)]
pub struct BroadcastChannel {
    id: u64,
    name: String,
    hub: Arc<HubInner>,
    receiver: Receiver<Value>,
}

impl BroadcastChannel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 发送给同名通道上的其他端点，返回送达数量
    pub fn post_message(&self, message: Value) -> usize {
        let mut channels = self.hub.channels.lock();
        let Some(peers) = channels.get_mut(&self.name) else {
            return 0;
        };

        let mut delivered = 0;
        peers.retain(|(id, tx)| {
            if *id == self.id {
                return true;
            }
            match tx.send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    /// 入站消息接收端
    pub fn receiver(&self) -> &Receiver<Value> {
        &self.receiver
    }

    pub fn try_recv(&self) -> Option<Value> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for BroadcastChannel {
    fn drop(&mut self) {
        let mut channels = self.hub.channels.lock();
        if let Some(peers) = channels.get_mut(&self.name) {
            peers.retain(|(id, _)| *id != self.id);
            if peers.is_empty() {
                channels.remove(&self.name);
            }
        }
    }
}
