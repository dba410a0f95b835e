use std::sync::Arc;
use std::time::Duration;

use axum::{Json, extract::State};
use futures_util::future::join_all;

use crate::error::GatewayError;
use crate::providers::{Model, ModelListResponse};
use crate::server::AppState;

const MODELS_CACHE_KEY: &str = "models_list";
const MODELS_CACHE_TTL: Duration = Duration::from_secs(300);

/// 聚合所有供应商的模型列表：id 统一加 `provider/` 前缀，KV 缓存 5 分钟。
/// 单个供应商失败只告警跳过，不拖垮整个端点。
pub async fn list_models(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<ModelListResponse>, GatewayError> {
    if let Some(entry) = app_state.kv.get(MODELS_CACHE_KEY).await {
        if entry.tag.is_none() {
            if let Some(raw) = entry.value {
                match serde_json::from_str::<ModelListResponse>(&raw) {
                    Ok(cached) => return Ok(Json(cached)),
                    Err(e) => tracing::warn!("corrupt models cache entry: {}", e),
                }
            }
        }
    }

    let fetches = app_state.providers.iter().map(|(name, provider)| {
        let name = name.clone();
        let provider = provider.clone();
        async move { (name, provider.list_models().await) }
    });

    let mut all_models: Vec<Model> = Vec::new();
    for (name, result) in join_all(fetches).await {
        let listed = match result {
            Ok(listed) => listed,
            Err(e) => {
                tracing::warn!(provider = %name, "failed to list models: {}", e);
                continue;
            }
        };
        for model in listed.data {
            if model.id.is_empty() {
                continue;
            }
            if !app_state.config.model_allowed(&name, &model.id) {
                continue;
            }
            all_models.push(Model {
                id: format!("{}/{}", name, model.id),
                object: "model".to_string(),
                created: model.created,
                owned_by: if model.owned_by.is_empty() {
                    name.clone()
                } else {
                    model.owned_by
                },
            });
        }
    }

    let result = ModelListResponse {
        object: "list".to_string(),
        data: all_models,
    };

    // 空聚合直接返回但不缓存，等供应商恢复后重新拉取
    if !result.data.is_empty() {
        match serde_json::to_string(&result) {
            Ok(raw) => {
                app_state
                    .kv
                    .put(MODELS_CACHE_KEY, Some(raw), None, MODELS_CACHE_TTL)
                    .await
            }
            Err(e) => tracing::warn!("failed to serialize models cache: {}", e),
        }
    }

    Ok(Json(result))
}
