//! Worker 桥接
//!
//! 主线程一侧的请求/响应适配器，跟踪 data / error / loading 三个可观察状态。
//! 每个桥同一时间只跟踪一个逻辑请求：新的请求会覆盖 loading 状态，
//! 响应只按 type 过滤，不做请求关联。

use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    WorkerEvent, WorkerHandle, WorkerRequest, WorkerResponse, WorkerSource, WorkerSpawner,
};

pub const ERR_WORKER_UNSUPPORTED: &str = "Web Workers are not supported";
pub const ERR_REQUEST_TIMEOUT: &str = "Worker request timed out";

type SourceFactory = Box<dyn Fn() -> WorkerSource + Send + Sync>;

#[derive(Debug)]
struct BridgeState {
    data: watch::Sender<Value>,
    error: watch::Sender<Option<String>>,
    loading: watch::Sender<bool>,
    /// 每次发送请求递增，超时检查据此判断请求是否已被取代
    seq: AtomicU64,
}

impl BridgeState {
    fn fail(&self, message: String) {
        self.error.send_replace(Some(message));
        self.loading.send_replace(false);
    }
}

/// Worker 桥接
///
/// `init_worker` 和 `post_message` 需要在 tokio 运行时内调用。Drop 时终止 worker。
pub struct WorkerBridge {
    spawner: Arc<dyn WorkerSpawner>,
    make_source: SourceFactory,
    request_timeout: Option<Duration>,
    state: Arc<BridgeState>,
    worker: Mutex<Option<WorkerHandle>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerBridge {
    pub fn new<F>(spawner: Arc<dyn WorkerSpawner>, make_source: F) -> Self
    where
        F: Fn() -> WorkerSource + Send + Sync + 'static,
    {
        Self {
            spawner,
            make_source: Box::new(make_source),
            request_timeout: None,
            state: Arc::new(BridgeState {
                data: watch::channel(Value::Null).0,
                error: watch::channel(None).0,
                loading: watch::channel(false).0,
                seq: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
            listener: Mutex::new(None),
            watchdog: Mutex::new(None),
        }
    }

    /// 请求超时；未设置时请求没有期限
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// 启动 worker
    ///
    /// 运行环境不支持时写入错误，loading 保持为 true。
    pub fn init_worker(&self) {
        self.state.loading.send_replace(true);
        self.terminate();

        let source = (self.make_source)();
        let name = source.name().to_string();
        let (handle, events) = match self.spawner.spawn(source) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("启动 worker 失败: {}", e);
                self.state
                    .error
                    .send_replace(Some(ERR_WORKER_UNSUPPORTED.to_string()));
                return;
            }
        };

        let listener = tokio::spawn(listen(Arc::clone(&self.state), events, name.clone()));
        *self.worker.lock() = Some(handle);
        *self.listener.lock() = Some(listener);
        info!("worker 桥接已就绪: {}", name);
    }

    /// 发送请求；worker 未启动时为空操作
    pub fn post_message(&self, request: &WorkerRequest) {
        match request.to_value() {
            Ok(value) => self.post_value(value),
            Err(e) => self.state.fail(e.to_string()),
        }
    }

    /// 发送任意 JSON 请求
    pub fn post_value(&self, message: Value) {
        let worker = self.worker.lock();
        let Some(handle) = worker.as_ref() else {
            debug!("worker 未启动，忽略请求");
            return;
        };

        self.state.loading.send_replace(true);
        let seq = self.state.seq.fetch_add(1, Ordering::SeqCst) + 1;

        if let Err(e) = handle.post(message) {
            warn!("[{}] 发送请求失败: {}", handle.name(), e);
            self.state.fail(e.to_string());
            return;
        }
        drop(worker);

        if let Some(timeout) = self.request_timeout {
            self.arm_watchdog(seq, timeout);
        }
    }

    /// 终止 worker 并释放句柄
    pub fn terminate(&self) {
        if let Some(mut handle) = self.worker.lock().take() {
            handle.terminate();
            info!("worker 已终止: {}", handle.name());
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        if let Some(watchdog) = self.watchdog.lock().take() {
            watchdog.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|handle| !handle.is_terminated())
            .unwrap_or(false)
    }

    /// 最近一次响应的数据
    pub fn data(&self) -> Value {
        self.state.data.borrow().clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.error.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        *self.state.loading.borrow()
    }

    pub fn subscribe_data(&self) -> watch::Receiver<Value> {
        self.state.data.subscribe()
    }

    pub fn subscribe_error(&self) -> watch::Receiver<Option<String>> {
        self.state.error.subscribe()
    }

    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.state.loading.subscribe()
    }

    fn arm_watchdog(&self, seq: u64, timeout: Duration) {
        let state = Arc::clone(&self.state);
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if state.seq.load(Ordering::SeqCst) == seq && *state.loading.borrow() {
                warn!("worker 请求超时: {:?}", timeout);
                state.fail(ERR_REQUEST_TIMEOUT.to_string());
            }
        });
        if let Some(previous) = self.watchdog.lock().replace(watchdog) {
            previous.abort();
        }
    }
}

impl fmt::Debug for WorkerBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerBridge")
            .field("spawner", &self.spawner)
            .field("request_timeout", &self.request_timeout)
            .field("state", &self.state)
            .field("worker", &self.worker)
            .finish()
    }
}

impl Drop for WorkerBridge {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn listen(
    state: Arc<BridgeState>,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    name: String,
) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Message(value) => match serde_json::from_value::<WorkerResponse>(value) {
                Ok(response) => {
                    debug!("[{}] 收到响应: key={:?}", name, response.key());
                    state.data.send_replace(response.into_data());
                    state.loading.send_replace(false);
                }
                Err(_) => debug!("[{}] 丢弃未识别的 worker 消息", name),
            },
            WorkerEvent::Error(message) => {
                error!("[{}] worker 错误: {}", name, message);
                state.fail(message);
            }
        }
    }
    debug!("[{}] worker 事件流结束", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::tests::EchoWorker;
    use crate::worker::{
        ThreadSpawner, UnsupportedSpawner, WorkerBehavior, WorkerFlow, WorkerScope,
    };
    use serde_json::json;

    /// 只接收请求，从不响应
    struct SilentWorker;

    impl WorkerBehavior for SilentWorker {
        fn on_request(&mut self, _request: WorkerRequest, scope: &WorkerScope) -> WorkerFlow {
            scope.post_value(json!({"type": "PROGRESS", "data": 50}));
            WorkerFlow::Continue
        }
    }

    /// 每个请求都报错
    struct FailingWorker;

    impl WorkerBehavior for FailingWorker {
        fn on_request(&mut self, _request: WorkerRequest, scope: &WorkerScope) -> WorkerFlow {
            scope.report_error("boom");
            WorkerFlow::Continue
        }
    }

    /// 响应不带 key
    struct KeylessWorker;

    impl WorkerBehavior for KeylessWorker {
        fn on_request(&mut self, _request: WorkerRequest, scope: &WorkerScope) -> WorkerFlow {
            scope.post_value(json!({"type": "DATA_UPDATE", "data": {"theme": "dark"}}));
            WorkerFlow::Continue
        }
    }

    /// 处理请求时 panic
    struct PanickingWorker;

    impl WorkerBehavior for PanickingWorker {
        fn on_request(&mut self, _request: WorkerRequest, _scope: &WorkerScope) -> WorkerFlow {
            panic!("worker crashed");
        }
    }

    async fn wait_loading_cleared(bridge: &WorkerBridge) {
        let mut loading = bridge.subscribe_loading();
        tokio::time::timeout(Duration::from_secs(5), loading.wait_for(|l| !*l))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_response_updates_data_and_clears_loading() {
        let bridge = WorkerBridge::new(Arc::new(ThreadSpawner), || {
            WorkerSource::new("echo", || EchoWorker)
        });
        assert!(!bridge.is_loading());

        bridge.init_worker();
        assert!(bridge.is_running());
        bridge.post_message(&WorkerRequest::SyncData { key: "k".into() });
        assert!(bridge.is_loading());

        wait_loading_cleared(&bridge).await;
        assert_eq!(bridge.data(), json!("SYNC_DATA"));
        assert_eq!(bridge.error(), None);
    }

    #[tokio::test]
    async fn test_unrecognized_responses_are_dropped() {
        let bridge = WorkerBridge::new(Arc::new(ThreadSpawner), || {
            WorkerSource::new("silent", || SilentWorker)
        });
        bridge.init_worker();
        bridge.post_message(&WorkerRequest::ProcessData { data: json!([1]) });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(bridge.is_loading());
        assert_eq!(bridge.data(), Value::Null);
    }

    #[tokio::test]
    async fn test_response_without_key_is_stored() {
        let bridge = WorkerBridge::new(Arc::new(ThreadSpawner), || {
            WorkerSource::new("keyless", || KeylessWorker)
        });
        bridge.init_worker();
        bridge.post_message(&WorkerRequest::SyncData { key: "prefs".into() });

        wait_loading_cleared(&bridge).await;
        assert_eq!(bridge.data(), json!({"theme": "dark"}));
        assert_eq!(bridge.error(), None);
    }

    #[tokio::test]
    async fn test_worker_panic_is_stored_as_error() {
        let bridge = WorkerBridge::new(Arc::new(ThreadSpawner), || {
            WorkerSource::new("panicking", || PanickingWorker)
        });
        bridge.init_worker();
        bridge.post_message(&WorkerRequest::ProcessData { data: json!(1) });

        wait_loading_cleared(&bridge).await;
        assert_eq!(bridge.error().as_deref(), Some("worker crashed"));
        assert!(bridge.is_running());
    }

    #[tokio::test]
    async fn test_worker_error_is_stored() {
        let bridge = WorkerBridge::new(Arc::new(ThreadSpawner), || {
            WorkerSource::new("failing", || FailingWorker)
        });
        bridge.init_worker();
        bridge.post_message(&WorkerRequest::ProcessData { data: json!(1) });

        wait_loading_cleared(&bridge).await;
        assert_eq!(bridge.error().as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_unsupported_runtime_stays_loading() {
        let bridge = WorkerBridge::new(Arc::new(UnsupportedSpawner), || {
            WorkerSource::new("echo", || EchoWorker)
        });
        bridge.init_worker();
        assert_eq!(bridge.error().as_deref(), Some(ERR_WORKER_UNSUPPORTED));
        assert!(bridge.is_loading());
        assert!(!bridge.is_running());

        // 没有 worker 时发送请求为空操作
        bridge.post_message(&WorkerRequest::SyncData { key: "k".into() });
        assert_eq!(bridge.error().as_deref(), Some(ERR_WORKER_UNSUPPORTED));
    }

    #[tokio::test]
    async fn test_terminate_clears_handle() {
        let bridge = WorkerBridge::new(Arc::new(ThreadSpawner), || {
            WorkerSource::new("echo", || EchoWorker)
        });
        bridge.init_worker();
        bridge.terminate();
        assert!(!bridge.is_running());

        bridge.post_message(&WorkerRequest::SyncData { key: "k".into() });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bridge.data(), Value::Null);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let bridge = WorkerBridge::new(Arc::new(ThreadSpawner), || {
            WorkerSource::new("silent", || SilentWorker)
        })
        .with_request_timeout(Some(Duration::from_millis(50)));
        bridge.init_worker();
        bridge.post_message(&WorkerRequest::SyncData { key: "k".into() });

        wait_loading_cleared(&bridge).await;
        assert_eq!(bridge.error().as_deref(), Some(ERR_REQUEST_TIMEOUT));
    }
}
