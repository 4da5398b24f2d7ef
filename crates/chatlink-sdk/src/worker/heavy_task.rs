//! 重计算 worker
//!
//! `PROCESS_DATA`：数组按元素的 JSON 文本排序后返回，其他值原样返回。
//! `CLOSE`：worker 自行退出。

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use super::bridge::WorkerBridge;
use super::{
    WorkerBehavior, WorkerFlow, WorkerRequest, WorkerResponse, WorkerScope, WorkerSource,
    WorkerSpawner,
};

#[derive(Debug, Default)]
pub struct HeavyTaskWorker;

impl HeavyTaskWorker {
    pub fn source() -> WorkerSource {
        WorkerSource::new("heavy-task", || HeavyTaskWorker)
    }

    /// 数组按 JSON 文本稳定排序
    pub fn process(data: Value) -> Value {
        match data {
            Value::Array(items) => {
                let mut keyed: Vec<(String, Value)> = items
                    .into_iter()
                    .map(|item| (item.to_string(), item))
                    .collect();
                keyed.sort_by(|a, b| a.0.cmp(&b.0));
                Value::Array(keyed.into_iter().map(|(_, item)| item).collect())
            }
            other => other,
        }
    }
}

impl WorkerBehavior for HeavyTaskWorker {
    fn on_request(&mut self, request: WorkerRequest, scope: &WorkerScope) -> WorkerFlow {
        match request {
            WorkerRequest::ProcessData { data } => {
                scope.post(&WorkerResponse::Result {
                    data: Self::process(data),
                });
                WorkerFlow::Continue
            }
            WorkerRequest::Close => WorkerFlow::Close,
            other => {
                debug!("重计算 worker 忽略请求: {}", other.request_type());
                WorkerFlow::Continue
            }
        }
    }
}

/// 重计算任务的调用方接口
#[derive(Debug)]
pub struct HeavyTask {
    bridge: WorkerBridge,
}

impl HeavyTask {
    pub fn new(spawner: Arc<dyn WorkerSpawner>, request_timeout: Option<Duration>) -> Self {
        let bridge = WorkerBridge::new(spawner, HeavyTaskWorker::source)
            .with_request_timeout(request_timeout);
        Self { bridge }
    }

    pub fn init_worker(&self) {
        self.bridge.init_worker();
    }

    pub fn process_data(&self, data: Value) {
        self.bridge.post_message(&WorkerRequest::ProcessData { data });
    }

    /// 让 worker 自行退出
    pub fn close(&self) {
        self.bridge.post_message(&WorkerRequest::Close);
    }

    pub fn result(&self) -> Value {
        self.bridge.data()
    }

    pub fn subscribe_result(&self) -> watch::Receiver<Value> {
        self.bridge.subscribe_data()
    }

    pub fn error(&self) -> Option<String> {
        self.bridge.error()
    }

    pub fn is_loading(&self) -> bool {
        self.bridge.is_loading()
    }

    pub fn terminate(&self) {
        self.bridge.terminate();
    }
}
