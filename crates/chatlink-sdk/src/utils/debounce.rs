//! 防抖器
//!
//! 在窗口期内重复触发只会执行最后一次；每次触发都会重新计时。

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 触发一次；窗口结束后执行 `action`，之前未执行的动作被丢弃
    ///
    /// 需要在 tokio 运行时内调用。
    pub fn trigger<F>(&self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let window = self.window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            action.await;
        });

        if let Some(previous) = self.pending.lock().replace(handle) {
            if !previous.is_finished() {
                debug!("防抖窗口内重复触发，丢弃上一次动作");
                previous.abort();
            }
        }
    }

    /// 取消尚未执行的动作，返回是否真的取消了什么
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// 是否有等待中的动作
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_action() {
        let debouncer = Debouncer::new(Duration::from_millis(1000));
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..5 {
            let counter = counter.clone();
            debouncer.trigger(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_action() {
        let debouncer = Debouncer::new(Duration::from_millis(1000));
        let counter = Arc::new(AtomicU32::new(0));

        let c = counter.clone();
        debouncer.trigger(async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(debouncer.is_pending());
        assert!(debouncer.cancel());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!debouncer.cancel());
    }
}
