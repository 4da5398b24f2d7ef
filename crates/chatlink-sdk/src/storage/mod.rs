//! 持久化存储
//!
//! 扁平的字符串键值空间，值为 JSON 文本：
//! - `SledStore`: 基于 sled，进程重启后仍然存在
//! - `MemoryStore`: 进程内存储，用于未配置数据目录的场景和测试
//!
//! 同一个存储实例被所有同步 worker 共享（也存放认证 `token` 等条目）。

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

use crate::error::Result;

pub mod kv;

pub use kv::SledStore;

/// 认证 token 所在的键
pub const TOKEN_KEY: &str = "token";

/// 持久化键值存储
///
/// 方法是同步的：worker 在独立线程中直接调用。
pub trait PersistentStore: Send + Sync + fmt::Debug {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// 删除键，返回键之前是否存在
    fn remove_item(&self, key: &str) -> Result<bool>;

    fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_item(key)?.is_some())
    }
}

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl PersistentStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<bool> {
        Ok(self.items.write().remove(key).is_some())
    }
}
