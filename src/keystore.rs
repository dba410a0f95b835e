use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::authority::{AuthorityClient, VerifyOutcome};
use crate::kv::{CacheTag, KvCache};

/// API Key 用途：决定选用哪条 pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    #[default]
    Default,
    Cursor,
}

impl Purpose {
    /// authority 下发的是自由文本，未知值一律回落到 default
    pub fn parse(raw: &str) -> Self {
        match raw {
            "cursor" => Purpose::Cursor,
            _ => Purpose::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Default => "default",
            Purpose::Cursor => "cursor",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub user_id: i64,
    pub active: bool,
    pub purpose: Purpose,
}

// KV 中各状态的 TTL。revoked/not_found 偏长（计费敏感），error 偏短（别把
// authority 故障缓存一小时）
const VALID_TTL: Duration = Duration::from_secs(600);
const REVOKED_TTL: Duration = Duration::from_secs(3600);
const NOT_FOUND_TTL: Duration = Duration::from_secs(3600);
const ERROR_TTL: Duration = Duration::from_secs(60);

/// cache-aside 的 key 校验：边缘 KV 打头阵，miss 时回源 authority，
/// 负结果也写缓存以抵御无效 key 洪泛
#[derive(Clone)]
pub struct ApiKeyStore {
    kv: Arc<dyn KvCache>,
    authority: Arc<AuthorityClient>,
}

fn cache_key(key: &str) -> String {
    format!("apikey:{key}")
}

impl ApiKeyStore {
    pub fn new(kv: Arc<dyn KvCache>, authority: Arc<AuthorityClient>) -> Self {
        Self { kv, authority }
    }

    pub async fn get_api_key(&self, key: &str) -> Option<ApiKeyRecord> {
        let cache_key = cache_key(key);

        if let Some(entry) = self.kv.get(&cache_key).await {
            if entry.tag.is_some() {
                return None;
            }
            if let Some(raw) = entry.value {
                match serde_json::from_str::<ApiKeyRecord>(&raw) {
                    Ok(record) => return Some(record),
                    // 缓存内容损坏时按 miss 处理，回源修复
                    Err(e) => tracing::warn!("corrupt api key cache entry: {}", e),
                }
            }
        }

        match self.authority.verify_key(key).await {
            VerifyOutcome::Valid(record) => {
                match serde_json::to_string(&record) {
                    Ok(raw) => self.kv.put(&cache_key, Some(raw), None, VALID_TTL).await,
                    Err(e) => tracing::warn!("failed to serialize api key record: {}", e),
                }
                Some(record)
            }
            VerifyOutcome::Revoked => {
                self.kv
                    .put(&cache_key, None, Some(CacheTag::Revoked), REVOKED_TTL)
                    .await;
                None
            }
            VerifyOutcome::NotFound => {
                self.kv
                    .put(&cache_key, None, Some(CacheTag::NotFound), NOT_FOUND_TTL)
                    .await;
                None
            }
            VerifyOutcome::Error(reason) => {
                tracing::warn!("api key verification failed: {}", reason);
                self.kv
                    .put(&cache_key, None, Some(CacheTag::Error), ERROR_TTL)
                    .await;
                None
            }
        }
    }

    /// 吊销传播入口：authority 侧变更后调用以立即生效
    pub async fn invalidate(&self, key: &str) {
        self.kv.delete(&cache_key(key)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purpose_parses_known_values_and_falls_back() {
        assert_eq!(Purpose::parse("cursor"), Purpose::Cursor);
        assert_eq!(Purpose::parse("default"), Purpose::Default);
        assert_eq!(Purpose::parse("something-new"), Purpose::Default);
    }

    #[test]
    fn api_key_record_round_trips_purpose() {
        let record = ApiKeyRecord {
            user_id: 42,
            active: true,
            purpose: Purpose::Cursor,
        };
        let raw = serde_json::to_string(&record).unwrap();
        let parsed: ApiKeyRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.purpose, Purpose::Cursor);
        assert_eq!(parsed.user_id, 42);
    }
}
