//! 后台 Worker
//!
//! 每个 worker 运行在独立的 OS 线程上，拥有私有内存，只通过消息通信：
//! - 请求：调用方 → worker，走 crossbeam 通道，worker 内严格串行处理
//! - 响应 / 错误：worker → 调用方，走 tokio mpsc
//!
//! 消息体是 JSON（`WorkerRequest` / `WorkerResponse` 为其类型化视图），
//! 无法解码的请求被忽略。

use crossbeam_channel::{never, select, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{ChatLinkError, Result};

pub mod bridge;
pub mod broadcast;
pub mod heavy_task;
pub mod sync_worker;

pub use bridge::WorkerBridge;
pub use broadcast::{BroadcastChannel, BroadcastHub};
pub use heavy_task::{HeavyTask, HeavyTaskWorker};
pub use sync_worker::SyncWorker;

/// 发给 worker 的请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    /// 重计算任务
    ProcessData {
        #[serde(default)]
        data: Value,
    },
    /// 让 worker 自行退出
    Close,
    /// 读取缓存
    SyncData {
        #[serde(default)]
        key: String,
    },
    /// 写缓存 + 存储，并广播给其他实例
    BroadcastUpdate {
        #[serde(default)]
        key: String,
        #[serde(default)]
        data: Value,
    },
    /// 从存储重新加载
    UpdateFromStorage {
        #[serde(default)]
        key: String,
    },
}

impl WorkerRequest {
    pub fn request_type(&self) -> &'static str {
        match self {
            WorkerRequest::ProcessData { .. } => "PROCESS_DATA",
            WorkerRequest::Close => "CLOSE",
            WorkerRequest::SyncData { .. } => "SYNC_DATA",
            WorkerRequest::BroadcastUpdate { .. } => "BROADCAST_UPDATE",
            WorkerRequest::UpdateFromStorage { .. } => "UPDATE_FROM_STORAGE",
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// worker 的响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerResponse {
    Result {
        #[serde(default)]
        data: Value,
    },
    SyncResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(default)]
        data: Value,
    },
    DataUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(default)]
        data: Value,
    },
}

impl WorkerResponse {
    pub fn key(&self) -> Option<&str> {
        match self {
            WorkerResponse::Result { .. } => None,
            WorkerResponse::SyncResponse { key, .. } | WorkerResponse::DataUpdate { key, .. } => {
                key.as_deref()
            }
        }
    }

    pub fn data(&self) -> &Value {
        match self {
            WorkerResponse::Result { data }
            | WorkerResponse::SyncResponse { data, .. }
            | WorkerResponse::DataUpdate { data, .. } => data,
        }
    }

    pub fn into_data(self) -> Value {
        match self {
            WorkerResponse::Result { data }
            | WorkerResponse::SyncResponse { data, .. }
            | WorkerResponse::DataUpdate { data, .. } => data,
        }
    }
}

/// worker → 调用方
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Message(Value),
    Error(String),
}

/// worker 内部可用的出站能力
#[derive(Debug, Clone)]
pub struct WorkerScope {
    name: String,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerScope {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn post(&self, response: &WorkerResponse) {
        match serde_json::to_value(response) {
            Ok(value) => self.post_value(value),
            Err(e) => self.report_error(format!("序列化响应失败: {}", e)),
        }
    }

    pub fn post_value(&self, value: Value) {
        if self.events.send(WorkerEvent::Message(value)).is_err() {
            debug!("[{}] 调用方已释放，丢弃响应", self.name);
        }
    }

    /// 上报运行时错误（对应调用方的 error 状态）
    pub fn report_error<S: Into<String>>(&self, message: S) {
        let message = message.into();
        warn!("[{}] worker 运行时错误: {}", self.name, message);
        let _ = self.events.send(WorkerEvent::Error(message));
    }
}

/// 处理完一条请求后 worker 是否继续运行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerFlow {
    Continue,
    Close,
}

/// worker 的行为
pub trait WorkerBehavior: Send {
    fn on_request(&mut self, request: WorkerRequest, scope: &WorkerScope) -> WorkerFlow;

    /// 需要同时监听的广播接收端
    fn broadcast_receiver(&self) -> Option<Receiver<Value>> {
        None
    }

    fn on_broadcast(&mut self, _message: Value, _scope: &WorkerScope) {}
}

type BehaviorFactory = Box<dyn FnOnce() -> Box<dyn WorkerBehavior> + Send>;

/// worker 的"脚本"：名字 + 在 worker 线程上构造行为的工厂
pub struct WorkerSource {
    name: String,
    factory: BehaviorFactory,
}

impl WorkerSource {
    pub fn new<F, B>(name: &str, factory: F) -> Self
    where
        F: FnOnce() -> B + Send + 'static,
        B: WorkerBehavior + 'static,
    {
        Self {
            name: name.to_string(),
            factory: Box::new(move || Box::new(factory()) as Box<dyn WorkerBehavior>),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for WorkerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSource")
            .field("name", &self.name)
            .field("factory", &"<fn>")
            .finish()
    }
}

/// 已启动 worker 的句柄
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    requests: Option<Sender<Value>>,
    terminated: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn post(&self, message: Value) -> Result<()> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(ChatLinkError::WorkerTerminated);
        }
        match &self.requests {
            Some(tx) => tx
                .send(message)
                .map_err(|_| ChatLinkError::WorkerTerminated),
            None => Err(ChatLinkError::WorkerTerminated),
        }
    }

    /// 立即终止：排队中的请求不再处理
    pub fn terminate(&mut self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            debug!("[{}] 终止 worker", self.name);
        }
        self.requests = None;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// worker 运行环境
pub trait WorkerSpawner: Send + Sync + fmt::Debug {
    fn spawn(
        &self,
        source: WorkerSource,
    ) -> Result<(WorkerHandle, mpsc::UnboundedReceiver<WorkerEvent>)>;
}

/// 每个 worker 一个专用线程
#[derive(Debug, Default, Clone)]
pub struct ThreadSpawner;

impl WorkerSpawner for ThreadSpawner {
    fn spawn(
        &self,
        source: WorkerSource,
    ) -> Result<(WorkerHandle, mpsc::UnboundedReceiver<WorkerEvent>)> {
        let (request_tx, request_rx) = unbounded::<Value>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let terminated = Arc::new(AtomicBool::new(false));

        let WorkerSource { name, factory } = source;
        let scope = WorkerScope {
            name: name.clone(),
            events: event_tx,
        };
        let flag = Arc::clone(&terminated);

        thread::Builder::new()
            .name(format!("chatlink-worker-{}", name))
            .spawn(move || {
                if let Some(behavior) = guarded(&scope, factory) {
                    run_worker(behavior, request_rx, scope, flag);
                }
            })
            .map_err(|e| ChatLinkError::WorkerUnsupported(format!("无法启动 worker 线程: {}", e)))?;

        info!("🔄 worker 已启动: {}", name);
        let handle = WorkerHandle {
            name,
            requests: Some(request_tx),
            terminated,
        };
        Ok((handle, event_rx))
    }
}

/// 不支持后台 worker 的运行环境
#[derive(Debug, Default, Clone)]
pub struct UnsupportedSpawner;

impl WorkerSpawner for UnsupportedSpawner {
    fn spawn(
        &self,
        source: WorkerSource,
    ) -> Result<(WorkerHandle, mpsc::UnboundedReceiver<WorkerEvent>)> {
        Err(ChatLinkError::WorkerUnsupported(format!(
            "当前运行环境不支持 worker: {}",
            source.name()
        )))
    }
}

fn run_worker(
    mut behavior: Box<dyn WorkerBehavior>,
    requests: Receiver<Value>,
    scope: WorkerScope,
    terminated: Arc<AtomicBool>,
) {
    let broadcasts = behavior.broadcast_receiver().unwrap_or_else(never);

    loop {
        select! {
            recv(requests) -> message => {
                let Ok(message) = message else {
                    break;
                };
                if terminated.load(Ordering::SeqCst) {
                    break;
                }
                let request = match serde_json::from_value::<WorkerRequest>(message) {
                    Ok(request) => request,
                    Err(e) => {
                        debug!("[{}] 忽略无法解码的请求: {}", scope.name(), e);
                        continue;
                    }
                };
                let flow = guarded(&scope, || behavior.on_request(request, &scope));
                if flow == Some(WorkerFlow::Close) {
                    info!("🛑 [{}] worker 自行关闭", scope.name());
                    terminated.store(true, Ordering::SeqCst);
                    break;
                }
            }
            recv(broadcasts) -> message => {
                match message {
                    Ok(message) => {
                        if terminated.load(Ordering::SeqCst) {
                            break;
                        }
                        guarded(&scope, || behavior.on_broadcast(message, &scope));
                    }
                    Err(_) => {
                        error!("[{}] 广播通道已断开", scope.name());
                        break;
                    }
                }
            }
        }
    }

    debug!("[{}] worker 线程退出", scope.name());
}

/// 执行 worker 代码；panic 作为运行时错误上报，worker 继续处理后续消息
fn guarded<R>(scope: &WorkerScope, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            scope.report_error(panic_message(payload.as_ref()));
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    /// 把请求原样回显为 RESULT
    pub(crate) struct EchoWorker;

    impl WorkerBehavior for EchoWorker {
        fn on_request(&mut self, request: WorkerRequest, scope: &WorkerScope) -> WorkerFlow {
            match request {
                WorkerRequest::Close => WorkerFlow::Close,
                other => {
                    scope.post(&WorkerResponse::Result {
                        data: json!(other.request_type()),
                    });
                    WorkerFlow::Continue
                }
            }
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Option<WorkerEvent> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[test]
    fn test_request_wire_format() {
        let request = WorkerRequest::BroadcastUpdate {
            key: "prefs".into(),
            data: json!({"theme": "dark"}),
        };
        assert_eq!(
            request.to_value().unwrap(),
            json!({"type": "BROADCAST_UPDATE", "key": "prefs", "data": {"theme": "dark"}})
        );
        assert_eq!(
            serde_json::from_value::<WorkerRequest>(json!({"type": "CLOSE"})).unwrap(),
            WorkerRequest::Close
        );
        // 缺失的 key 视为空
        assert_eq!(
            serde_json::from_value::<WorkerRequest>(json!({"type": "SYNC_DATA"})).unwrap(),
            WorkerRequest::SyncData { key: String::new() }
        );
    }

    #[test]
    fn test_response_wire_format() {
        let response: WorkerResponse =
            serde_json::from_value(json!({"type": "DATA_UPDATE", "key": "k", "data": 1})).unwrap();
        assert_eq!(response.key(), Some("k"));
        assert_eq!(response.data(), &json!(1));
        assert!(serde_json::from_value::<WorkerResponse>(json!({"type": "PING"})).is_err());

        // key 可以省略
        let keyless: WorkerResponse =
            serde_json::from_value(json!({"type": "DATA_UPDATE", "data": {"theme": "dark"}}))
                .unwrap();
        assert_eq!(keyless.key(), None);
        assert_eq!(
            serde_json::to_value(&keyless).unwrap(),
            json!({"type": "DATA_UPDATE", "data": {"theme": "dark"}})
        );
    }

    #[tokio::test]
    async fn test_thread_worker_round_trip_and_close() {
        let (handle, mut events) = ThreadSpawner
            .spawn(WorkerSource::new("echo", || EchoWorker))
            .unwrap();

        handle.post(json!({"type": "unknown"})).unwrap();
        handle.post(json!({"type": "SYNC_DATA", "key": "a"})).unwrap();
        assert_eq!(
            next_event(&mut events).await,
            Some(WorkerEvent::Message(json!({"type": "RESULT", "data": "SYNC_DATA"})))
        );

        handle.post(json!({"type": "CLOSE"})).unwrap();
        // worker 退出后事件流结束
        assert_eq!(next_event(&mut events).await, None);
        assert!(handle.is_terminated());
        assert!(handle.post(json!({"type": "SYNC_DATA", "key": "a"})).is_err());
    }

    #[tokio::test]
    async fn test_terminate_stops_worker() {
        let (mut handle, mut events) = ThreadSpawner
            .spawn(WorkerSource::new("echo", || EchoWorker))
            .unwrap();
        handle.terminate();
        assert!(matches!(
            handle.post(json!({"type": "CLOSE"})),
            Err(ChatLinkError::WorkerTerminated)
        ));
        assert_eq!(next_event(&mut events).await, None);
    }

    #[tokio::test]
    async fn test_panic_is_reported_and_worker_survives() {
        struct Fragile;

        impl WorkerBehavior for Fragile {
            fn on_request(&mut self, request: WorkerRequest, scope: &WorkerScope) -> WorkerFlow {
                if let WorkerRequest::ProcessData { .. } = request {
                    panic!("bad input");
                }
                EchoWorker.on_request(request, scope)
            }
        }

        let (handle, mut events) = ThreadSpawner
            .spawn(WorkerSource::new("fragile", || Fragile))
            .unwrap();
        handle.post(json!({"type": "PROCESS_DATA", "data": 1})).unwrap();
        assert_eq!(
            next_event(&mut events).await,
            Some(WorkerEvent::Error("bad input".to_string()))
        );

        handle.post(json!({"type": "SYNC_DATA", "key": "a"})).unwrap();
        assert_eq!(
            next_event(&mut events).await,
            Some(WorkerEvent::Message(json!({"type": "RESULT", "data": "SYNC_DATA"})))
        );
    }

    #[tokio::test]
    async fn test_panic_in_factory_is_reported() {
        let (_handle, mut events) = ThreadSpawner
            .spawn(WorkerSource::new("broken", || -> EchoWorker {
                panic!("cannot build worker")
            }))
            .unwrap();
        assert_eq!(
            next_event(&mut events).await,
            Some(WorkerEvent::Error("cannot build worker".to_string()))
        );
        assert_eq!(next_event(&mut events).await, None);
    }

    #[test]
    fn test_unsupported_spawner() {
        let err = UnsupportedSpawner
            .spawn(WorkerSource::new("echo", || EchoWorker))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Capability);
    }
}
