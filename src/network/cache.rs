//! 会话缓存
//!
//! 以规范化 URL 为键保存已经处理过的资源（类型、字节、依赖 URL），
//! 命中时的输出与重新抓取完全一致。条目常驻内存，配置了路径时
//! 从 redb 数据库加载，并在 `persist()` 时写回新增条目。失败的抓取从不缓存。

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CaptureError, CaptureResult};

const RESOURCES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// 缓存中的单个资源
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResource {
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    #[serde(with = "crate::utils::serde_base64")]
    pub value: Vec<u8>,
    #[serde(default)]
    pub dependent_urls: Vec<String>,
}

/// 跨抓取共享的资源缓存
pub struct SessionCache {
    entries: RwLock<HashMap<String, CachedResource>>,
    dirty: RwLock<HashSet<String>>,
    db: Option<Database>,
}

impl SessionCache {
    /// 仅驻留内存的缓存，`persist()` 为空操作
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            dirty: RwLock::new(HashSet::new()),
            db: None,
        }
    }

    /// 打开（或创建）磁盘上的缓存数据库并加载全部条目
    pub fn open<P: AsRef<Path>>(path: P) -> CaptureResult<Self> {
        let db = Database::create(path.as_ref())?;
        let mut entries = HashMap::new();

        {
            let read_txn = db.begin_read()?;
            match read_txn.open_table(RESOURCES_TABLE) {
                Ok(table) => {
                    for item in table.iter()? {
                        let (key, value) = item?;
                        match serde_json::from_slice::<CachedResource>(value.value()) {
                            Ok(resource) => {
                                entries.insert(key.value().to_string(), resource);
                            }
                            Err(e) => warn!("skipping corrupt cache entry {}: {}", key.value(), e),
                        }
                    }
                }
                Err(TableError::TableDoesNotExist(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        debug!("session cache loaded {} entries from {}", entries.len(), path.as_ref().display());

        Ok(Self {
            entries: RwLock::new(entries),
            dirty: RwLock::new(HashSet::new()),
            db: Some(db),
        })
    }

    pub fn get(&self, url: &str) -> Option<CachedResource> {
        self.entries.read().ok()?.get(url).cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(url))
            .unwrap_or(false)
    }

    /// 写入条目；同一 URL 的重复写入是幂等的
    pub fn insert(&self, url: &str, resource: CachedResource) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(url.to_string(), resource);
        }
        if let Ok(mut dirty) = self.dirty.write() {
            dirty.insert(url.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 将新增条目写回磁盘，返回写入条数
    pub fn persist(&self) -> CaptureResult<usize> {
        let Some(db) = &self.db else {
            return Ok(0);
        };

        let dirty: Vec<String> = match self.dirty.write() {
            Ok(mut dirty) => dirty.drain().collect(),
            Err(_) => return Err(CaptureError::Cache("dirty set lock poisoned".to_string())),
        };
        if dirty.is_empty() {
            return Ok(0);
        }

        let entries = self
            .entries
            .read()
            .map_err(|_| CaptureError::Cache("entries lock poisoned".to_string()))?;

        let write_txn = db.begin_write()?;
        let mut written = 0;
        {
            let mut table = write_txn.open_table(RESOURCES_TABLE)?;
            for url in &dirty {
                if let Some(resource) = entries.get(url) {
                    let encoded = serde_json::to_vec(resource)?;
                    table.insert(url.as_str(), encoded.as_slice())?;
                    written += 1;
                }
            }
        }
        write_txn.commit()?;

        debug!("session cache persisted {} entries", written);
        Ok(written)
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(value: &[u8]) -> CachedResource {
        CachedResource {
            content_type: Some("text/css".to_string()),
            value: value.to_vec(),
            dependent_urls: vec!["https://example.com/b.css".to_string()],
        }
    }

    #[test]
    fn test_in_memory_insert_and_get() {
        let cache = SessionCache::in_memory();
        assert!(cache.is_empty());
        cache.insert("https://example.com/a.css", resource(b"a{}"));
        assert_eq!(cache.get("https://example.com/a.css"), Some(resource(b"a{}")));
        assert!(cache.get("https://example.com/missing.css").is_none());
        assert_eq!(cache.persist().unwrap(), 0);
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.redb");

        {
            let cache = SessionCache::open(&path).unwrap();
            cache.insert("https://example.com/a.css", resource(b"a{}"));
            assert_eq!(cache.persist().unwrap(), 1);
            assert_eq!(cache.persist().unwrap(), 0);
        }

        let reopened = SessionCache::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("https://example.com/a.css"), Some(resource(b"a{}")));
    }

    #[test]
    fn test_cached_resource_json_uses_base64() {
        let json = serde_json::to_string(&resource(b"a{}")).unwrap();
        assert!(json.contains("\"value\":\"YXt9\""));
        assert!(json.contains("\"dependentUrls\""));
    }
}
