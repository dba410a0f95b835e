use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// 负缓存的旁路标记：区分「映射为 null 的命中」与「缓存未命中」
///
/// - `Revoked` / `NotFound` 是长 TTL 的计费敏感负缓存
/// - `Error` 是短 TTL 的 authority 健康负缓存，避免把故障缓存一小时
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTag {
    Revoked,
    NotFound,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Option<String>,
    pub tag: Option<CacheTag>,
}

// 边缘 KV 抽象（可由内存实现、Redis 等实现）
#[async_trait]
pub trait KvCache: Send + Sync {
    /// 返回 `None` 表示未命中或已过期；命中时附带旁路元数据
    async fn get(&self, key: &str) -> Option<CacheEntry>;
    async fn put(&self, key: &str, value: Option<String>, tag: Option<CacheTag>, ttl: Duration);
    async fn delete(&self, key: &str);
}

struct StoredEntry {
    value: Option<String>,
    tag: Option<CacheTag>,
    expires_at: Instant,
}

/// 进程内的默认实现：惰性过期，写入幂等（相同 TTL 的并发写互不影响）
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvCache for MemoryKv {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(stored) if stored.expires_at > Instant::now() => {
                    return Some(CacheEntry {
                        value: stored.value.clone(),
                        tag: stored.tag,
                    });
                }
                Some(_) => {}
                None => return None,
            }
        }
        // 过期条目顺手清掉
        self.entries.write().await.remove(key);
        None
    }

    async fn put(&self, key: &str, value: Option<String>, tag: Option<CacheTag>, ttl: Duration) {
        let stored = StoredEntry {
            value,
            tag,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), stored);
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}
