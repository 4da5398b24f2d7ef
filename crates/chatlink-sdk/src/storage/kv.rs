//! 基于 sled 的持久化存储

use sled::{Db, Tree};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::PersistentStore;
use crate::error::{ChatLinkError, Result};

/// 所有条目所在的 Tree
const STORAGE_TREE: &str = "local_storage";

/// sled 存储
#[derive(Debug, Clone)]
pub struct SledStore {
    base_path: PathBuf,
    db: Db,
    tree: Tree,
}

impl SledStore {
    /// 在 `base_path/kv` 下打开（或创建）数据库
    pub fn open(base_path: &Path) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("kv");

        std::fs::create_dir_all(&kv_path)
            .map_err(|e| ChatLinkError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 同一目录的旧实例可能刚释放文件锁，带退避重试
        const MAX_OPEN_RETRIES: u32 = 5;
        const RETRY_DELAY_MS: u64 = 100;
        let mut attempt = 0;
        let db = loop {
            match sled::open(&kv_path) {
                Ok(db) => break db,
                Err(e) => {
                    let msg = e.to_string();
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    attempt += 1;
                    if !is_lock || attempt >= MAX_OPEN_RETRIES {
                        return Err(ChatLinkError::KvStore(format!(
                            "打开 sled 数据库失败: {}",
                            e
                        )));
                    }
                    warn!("sled 数据库被占用，第 {} 次重试", attempt);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS << attempt));
                }
            }
        };

        let tree = db
            .open_tree(STORAGE_TREE)
            .map_err(|e| ChatLinkError::KvStore(format!("打开 Tree 失败: {}", e)))?;

        info!("KV 存储已打开: {}", kv_path.display());
        Ok(Self {
            base_path,
            db,
            tree,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 所有键（按字节序）
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in self.tree.iter() {
            let (key, _) =
                entry.map_err(|e| ChatLinkError::KvStore(format!("遍历键失败: {}", e)))?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }

    /// 清空所有条目
    pub fn clear(&self) -> Result<()> {
        self.tree
            .clear()
            .map_err(|e| ChatLinkError::KvStore(format!("清空存储失败: {}", e)))
    }

    /// 刷盘
    pub fn flush(&self) -> Result<usize> {
        self.db
            .flush()
            .map_err(|e| ChatLinkError::KvStore(format!("刷盘失败: {}", e)))
    }
}

impl PersistentStore for SledStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .tree
            .get(key)
            .map_err(|e| ChatLinkError::KvStore(format!("获取键值对失败: {}", e)))?;

        match value {
            Some(bytes) => {
                let text = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    ChatLinkError::Serialization(format!("存储值不是合法 UTF-8: {}", e))
                })?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.tree
            .insert(key, value.as_bytes())
            .map_err(|e| ChatLinkError::KvStore(format!("设置键值对失败: {}", e)))?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<bool> {
        let previous = self
            .tree
            .remove(key)
            .map_err(|e| ChatLinkError::KvStore(format!("删除键值对失败: {}", e)))?;
        Ok(previous.is_some())
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        self.tree
            .contains_key(key)
            .map_err(|e| ChatLinkError::KvStore(format!("检查键存在失败: {}", e)))
    }
}
