pub mod openai_compat;
pub mod sse;
pub mod test_provider;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ProviderKind, Settings};
use crate::error::Result;

pub use openai_compat::OpenAiCompatProvider;
pub use test_provider::TestProvider;

/// 上游 SSE 文本行的惰性序列
pub type SseLineStream = BoxStream<'static, Result<String>>;

// 模型列表沿用本地定义（兼容多数上游返回）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelListResponse {
    pub object: String,
    pub data: Vec<Model>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub owned_by: String,
}

/// 每个上游一个适配器：注入认证头、按需归一化 payload、产出 SSE 行流
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn list_models(&self) -> Result<ModelListResponse>;

    /// 非流式：返回上游完整响应对象
    async fn chat_completions(&self, payload: &Value) -> Result<Value>;

    /// 流式：返回 SSE 文本行的惰性序列；上游非 2xx 时直接返回 Err
    async fn chat_completions_stream(&self, payload: &Value) -> Result<SseLineStream>;
}

/// 按配置构建供应商注册表；缺密钥的真实上游跳过注册并告警
pub fn build_providers(settings: &Settings) -> BTreeMap<String, Arc<dyn ProviderAdapter>> {
    let mut providers: BTreeMap<String, Arc<dyn ProviderAdapter>> = BTreeMap::new();

    for (name, cfg) in &settings.providers {
        match cfg.kind {
            ProviderKind::Test => {
                providers.insert(name.clone(), Arc::new(TestProvider::new(name)));
            }
            ProviderKind::Openai => {
                let Some(api_key) = cfg.api_key.clone() else {
                    tracing::warn!(provider = %name, "no API key configured, skipping provider");
                    continue;
                };
                let Some(base_url) = cfg.base_url.clone() else {
                    tracing::warn!(provider = %name, "no base URL configured, skipping provider");
                    continue;
                };
                providers.insert(
                    name.clone(),
                    Arc::new(OpenAiCompatProvider::new(
                        name,
                        &base_url,
                        api_key,
                        cfg.flatten_tool_messages,
                    )),
                );
            }
        }
    }

    providers
}
