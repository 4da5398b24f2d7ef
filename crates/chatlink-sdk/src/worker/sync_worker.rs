//! 同步 worker：带持久化的键值缓存 + 跨实例广播中继
//!
//! 缓存归 worker 实例私有；写入同时落到缓存和存储，并通过广播通道通知
//! 同一 hub 上的其他同步 worker。

use crossbeam_channel::Receiver;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::broadcast::{BroadcastChannel, BroadcastHub};
use super::{
    WorkerBehavior, WorkerFlow, WorkerRequest, WorkerResponse, WorkerScope, WorkerSource,
};
use crate::error::ChatLinkError;
use crate::storage::PersistentStore;
use crate::utils::is_truthy;

/// 广播消息的 type
const BROADCAST_TYPE: &str = "UPDATE_FROM_STORAGE";

pub struct SyncWorker {
    cache: HashMap<String, Value>,
    storage: Arc<dyn PersistentStore>,
    /// 没有广播能力时为 None，中继退化为空操作
    channel: Option<BroadcastChannel>,
}

impl SyncWorker {
    pub fn new(
        storage: Arc<dyn PersistentStore>,
        hub: Option<&BroadcastHub>,
        channel_name: &str,
    ) -> Self {
        let channel = hub.map(|hub| hub.channel(channel_name));
        if channel.is_none() {
            debug!("未提供广播中心，跨实例同步不可用");
        }
        Self {
            cache: HashMap::new(),
            storage,
            channel,
        }
    }

    /// 作为 worker 源
    ///
    /// 广播通道在这里就加入，worker 线程启动前发出的广播也不会丢。
    pub fn source(
        storage: Arc<dyn PersistentStore>,
        hub: Option<&BroadcastHub>,
        channel_name: &str,
    ) -> WorkerSource {
        let worker = SyncWorker::new(storage, hub, channel_name);
        WorkerSource::new("sync", move || worker)
    }

    pub fn cached(&self, key: &str) -> Option<&Value> {
        self.cache.get(key)
    }

    fn sync_data(&self, key: &str, scope: &WorkerScope) {
        match self.cache.get(key) {
            Some(data) if is_truthy(data) => scope.post(&WorkerResponse::SyncResponse {
                key: Some(key.to_string()),
                data: data.clone(),
            }),
            _ => debug!("缓存中没有可用数据: {}", key),
        }
    }

    fn broadcast_update(&mut self, key: &str, data: Value, scope: &WorkerScope) {
        self.cache.insert(key.to_string(), data.clone());

        let persisted = serde_json::to_string(&data)
            .map_err(ChatLinkError::from)
            .and_then(|text| self.storage.set_item(key, &text));
        if let Err(e) = persisted {
            scope.report_error(format!("写入存储失败: {}", e));
        }

        if let Some(channel) = &self.channel {
            let delivered = channel.post_message(json!({
                "type": BROADCAST_TYPE,
                "key": key,
                "data": data,
            }));
            debug!("广播更新: key={}, 送达 {} 个实例", key, delivered);
        }
    }

    fn update_from_storage(&mut self, key: &str, scope: &WorkerScope) {
        let stored = match self.storage.get_item(key) {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(e) => {
                scope.report_error(format!("读取存储失败: {}", e));
                return;
            }
        };
        if stored.is_empty() {
            return;
        }

        match serde_json::from_str::<Value>(&stored) {
            Ok(data) => {
                self.cache.insert(key.to_string(), data.clone());
                scope.post(&WorkerResponse::DataUpdate {
                    key: Some(key.to_string()),
                    data,
                });
            }
            Err(e) => {
                warn!("存储中的值不是合法 JSON: key={}, error={}", key, e);
                scope.report_error(format!("解析存储数据失败: {}", e));
            }
        }
    }
}

impl WorkerBehavior for SyncWorker {
    fn on_request(&mut self, request: WorkerRequest, scope: &WorkerScope) -> WorkerFlow {
        match request {
            WorkerRequest::SyncData { key } if !key.is_empty() => self.sync_data(&key, scope),
            WorkerRequest::BroadcastUpdate { key, data } if !key.is_empty() => {
                self.broadcast_update(&key, data, scope)
            }
            WorkerRequest::UpdateFromStorage { key } if !key.is_empty() => {
                self.update_from_storage(&key, scope)
            }
            other => debug!("同步 worker 忽略请求: {}", other.request_type()),
        }
        WorkerFlow::Continue
    }

    fn broadcast_receiver(&self) -> Option<Receiver<Value>> {
        self.channel.as_ref().map(|channel| channel.receiver().clone())
    }

    fn on_broadcast(&mut self, message: Value, scope: &WorkerScope) {
        if message.get("type").and_then(Value::as_str) != Some(BROADCAST_TYPE) {
            return;
        }
        let key = match message.get("key").and_then(Value::as_str) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => return,
        };
        let data = message.get("data").cloned().unwrap_or(Value::Null);

        info!("收到其他实例的更新: {}", key);
        self.cache.insert(key.clone(), data.clone());
        scope.post(&WorkerResponse::DataUpdate {
            key: Some(key),
            data,
        });
    }
}
