//! 数据同步
//!
//! `SyncFacade` 面向调用方：每个 key 一个实例，内部持有一个同步 worker。
//! - 创建时启动 worker 并从存储加载
//! - `update_data` 先更新本地值再通知 worker（写存储 + 广播给其他实例）
//! - 本地值镜像 worker 的任何真值响应，后到者覆盖先到者
//! - Drop 时终止 worker

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::events::{ClientEvent, EventManager};
use crate::storage::PersistentStore;
use crate::utils::is_truthy;
use crate::worker::{BroadcastHub, SyncWorker, WorkerBridge, WorkerRequest, WorkerSpawner};

/// 同步 worker 依赖的运行环境（可在多个 facade 之间共享）
#[derive(Clone)]
pub struct SyncEnvironment {
    pub storage: Arc<dyn PersistentStore>,
    /// 广播中心；None 表示运行环境没有跨实例广播能力
    pub hub: Option<BroadcastHub>,
    pub spawner: Arc<dyn WorkerSpawner>,
    pub config: SyncConfig,
    pub events: Option<Arc<EventManager>>,
}

impl SyncEnvironment {
    pub fn new(
        storage: Arc<dyn PersistentStore>,
        spawner: Arc<dyn WorkerSpawner>,
        config: SyncConfig,
    ) -> Self {
        Self {
            storage,
            hub: None,
            spawner,
            config,
            events: None,
        }
    }

    pub fn with_hub(mut self, hub: BroadcastHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn with_events(mut self, events: Arc<EventManager>) -> Self {
        self.events = Some(events);
        self
    }
}

impl fmt::Debug for SyncEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEnvironment")
            .field("storage", &self.storage)
            .field("hub", &self.hub.is_some())
            .field("spawner", &self.spawner)
            .field("config", &self.config)
            .finish()
    }
}

/// 按 key 同步的数据
///
/// 需要在 tokio 运行时内创建。
pub struct SyncFacade {
    key: String,
    bridge: WorkerBridge,
    local: Arc<watch::Sender<Value>>,
    mirror: JoinHandle<()>,
}

impl SyncFacade {
    pub fn mount(env: &SyncEnvironment, key: &str) -> Self {
        let storage = Arc::clone(&env.storage);
        let hub = env.hub.clone();
        let channel_name = env.config.channel_name.clone();
        let bridge = WorkerBridge::new(Arc::clone(&env.spawner), move || {
            SyncWorker::source(Arc::clone(&storage), hub.as_ref(), &channel_name)
        })
        .with_request_timeout(env.config.request_timeout());

        let local = Arc::new(watch::channel(Value::Null).0);
        let mirror = tokio::spawn(mirror_results(
            bridge.subscribe_data(),
            Arc::clone(&local),
            key.to_string(),
            env.events.clone(),
        ));

        bridge.init_worker();
        bridge.post_message(&WorkerRequest::UpdateFromStorage {
            key: key.to_string(),
        });

        info!("同步已挂载: {}", key);
        Self {
            key: key.to_string(),
            bridge,
            local,
            mirror,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 本地值
    pub fn data(&self) -> Value {
        self.local.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Value> {
        self.local.subscribe()
    }

    pub fn error(&self) -> Option<String> {
        self.bridge.error()
    }

    pub fn is_loading(&self) -> bool {
        self.bridge.is_loading()
    }

    /// 向 worker 请求当前缓存值
    pub fn sync_data(&self) {
        self.bridge.post_message(&WorkerRequest::SyncData {
            key: self.key.clone(),
        });
    }

    /// 更新本地值并广播
    pub fn update_data(&self, data: Value) {
        self.local.send_replace(data.clone());
        self.bridge.post_message(&WorkerRequest::BroadcastUpdate {
            key: self.key.clone(),
            data,
        });
    }
}

impl fmt::Debug for SyncFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncFacade")
            .field("key", &self.key)
            .field("bridge", &self.bridge)
            .finish()
    }
}

impl Drop for SyncFacade {
    fn drop(&mut self) {
        self.mirror.abort();
        self.bridge.terminate();
        debug!("同步已卸载: {}", self.key);
    }
}

async fn mirror_results(
    mut results: watch::Receiver<Value>,
    local: Arc<watch::Sender<Value>>,
    key: String,
    events: Option<Arc<EventManager>>,
) {
    while results.changed().await.is_ok() {
        let data = results.borrow_and_update().clone();
        if !is_truthy(&data) {
            continue;
        }
        local.send_replace(data.clone());
        if let Some(events) = &events {
            events.emit(ClientEvent::sync_data_updated(key.as_str(), data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::worker::{ThreadSpawner, UnsupportedSpawner};
    use serde_json::json;
    use std::time::Duration;

    fn environment(storage: Arc<MemoryStore>, hub: Option<BroadcastHub>) -> SyncEnvironment {
        let env = SyncEnvironment::new(storage, Arc::new(ThreadSpawner), SyncConfig::default());
        match hub {
            Some(hub) => env.with_hub(hub),
            None => env,
        }
    }

    async fn wait_for_data(facade: &SyncFacade, expected: &Value) {
        let mut rx = facade.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| v == expected))
            .await
            .expect("timed out waiting for data")
            .unwrap();
    }

    #[tokio::test]
    async fn test_mount_loads_from_storage() {
        let storage = Arc::new(MemoryStore::new());
        storage.set_item("prefs", r#"{"theme":"dark"}"#).unwrap();
        let facade = SyncFacade::mount(&environment(storage, None), "prefs");

        wait_for_data(&facade, &json!({"theme": "dark"})).await;
        assert_eq!(facade.error(), None);
    }

    #[tokio::test]
    async fn test_update_then_sync_returns_latest() {
        let storage = Arc::new(MemoryStore::new());
        let facade = SyncFacade::mount(&environment(storage.clone(), None), "prefs");

        facade.update_data(json!({"theme": "light"}));
        facade.update_data(json!({"theme": "dark"}));
        assert_eq!(facade.data(), json!({"theme": "dark"}));

        facade.sync_data();
        let mut loading = facade.bridge.subscribe_loading();
        tokio::time::timeout(Duration::from_secs(5), loading.wait_for(|l| !*l))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(facade.bridge.data(), json!({"theme": "dark"}));
        assert_eq!(facade.data(), json!({"theme": "dark"}));
        assert_eq!(
            storage.get_item("prefs").unwrap().as_deref(),
            Some(r#"{"theme":"dark"}"#)
        );
    }

    #[tokio::test]
    async fn test_two_tabs_share_updates() {
        let storage = Arc::new(MemoryStore::new());
        let hub = BroadcastHub::new();
        let tab_a = SyncFacade::mount(&environment(storage.clone(), Some(hub.clone())), "prefs");
        let tab_b = SyncFacade::mount(&environment(storage.clone(), Some(hub.clone())), "prefs");

        tab_a.update_data(json!({"theme": "dark"}));
        assert_eq!(tab_a.data(), json!({"theme": "dark"}));

        wait_for_data(&tab_b, &json!({"theme": "dark"})).await;
        assert_eq!(
            storage.get_item("prefs").unwrap().as_deref(),
            Some(r#"{"theme":"dark"}"#)
        );

        // 新打开的实例从存储拿到同样的值
        let tab_c = SyncFacade::mount(&environment(storage, Some(hub)), "prefs");
        wait_for_data(&tab_c, &json!({"theme": "dark"})).await;
    }

    #[tokio::test]
    async fn test_drop_leaves_broadcast_channel() {
        let hub = BroadcastHub::new();
        let env = environment(Arc::new(MemoryStore::new()), Some(hub.clone()));
        let facade = SyncFacade::mount(&env, "prefs");
        assert_eq!(hub.subscriber_count("app_sync"), 1);

        drop(facade);
        // worker 线程退出后释放通道
        for _ in 0..100 {
            if hub.subscriber_count("app_sync") == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.subscriber_count("app_sync"), 0);
    }

    #[tokio::test]
    async fn test_unsupported_runtime_surfaces_error() {
        let env = SyncEnvironment::new(
            Arc::new(MemoryStore::new()),
            Arc::new(UnsupportedSpawner),
            SyncConfig::default(),
        );
        let facade = SyncFacade::mount(&env, "prefs");
        assert_eq!(
            facade.error().as_deref(),
            Some(crate::worker::bridge::ERR_WORKER_UNSUPPORTED)
        );
        assert!(facade.is_loading());

        facade.update_data(json!(1));
        assert_eq!(facade.data(), json!(1));
    }
}
