use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::keystore::ApiKeyRecord;
use crate::pipeline::{PipelineContext, pipeline_for};
use crate::server::AppState;
use crate::server::model_parser::ParsedModel;
use crate::server::streaming::stream_chat;
use crate::server::util::generate_request_id;
use crate::usage::{create_usage_log, estimate_usage, normalize_usage};

/// Chat Completions 主处理入口：
/// - 解析 `provider/model` 前缀并校验 allow-list
/// - 按 key 用途选择 pipeline，预处理请求体
/// - 根据 `stream` 标志分流到一次性或流式路径
/// - 每个被接受的请求恰好产生一条用量日志（异步入队，不阻塞响应）
pub async fn chat_completions(
    State(app_state): State<Arc<AppState>>,
    Extension(key): Extension<ApiKeyRecord>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let mut payload: Value =
        serde_json::from_slice(&body).map_err(|_| GatewayError::InvalidBody)?;
    if !payload.is_object() {
        return Err(GatewayError::InvalidBody);
    }

    let Some(model) = payload.get("model").and_then(Value::as_str) else {
        return Err(GatewayError::InvalidBody);
    };
    let parsed = ParsedModel::parse(model);
    let Some(provider_name) = parsed.provider_name.clone() else {
        // 网关要求 `provider/model` 形式；裸模型名视同未知模型
        return Err(GatewayError::ModelNotFound);
    };
    let Some(provider) = app_state.providers.get(&provider_name).cloned() else {
        return Err(GatewayError::ModelNotFound);
    };
    let real_model = parsed.upstream_model_name().to_string();
    if !app_state.config.model_allowed(&provider_name, &real_model) {
        return Err(GatewayError::ModelNotFound);
    }

    let stream = payload
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let request_id = generate_request_id();
    let pipeline = pipeline_for(key.purpose);
    let mut ctx = PipelineContext {
        request_id,
        model_name: format!("{}/{}", provider_name, real_model),
        provider_name,
        chat_history: vec![],
        user_id: key.user_id,
        purpose: key.purpose,
    };

    payload["model"] = Value::String(real_model);
    let payload = pipeline.preprocess_request(&ctx, payload);
    ctx.chat_history = payload
        .get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if stream {
        return stream_chat(app_state, pipeline, provider, ctx, payload).await;
    }

    let raw = provider.chat_completions(&payload).await.map_err(|e| {
        tracing::error!(request_id = %ctx.request_id, "upstream chat failed: {}", e);
        GatewayError::Upstream(e.to_string())
    })?;
    if !raw.is_object() {
        return Err(GatewayError::Upstream(format!(
            "{} returned a non-object response",
            ctx.provider_name
        )));
    }

    // usage 统一归一化覆盖；上游静默时按字符估算
    let (usage, is_estimated) = match raw.get("usage").and_then(normalize_usage) {
        Some(usage) => (usage, false),
        None => {
            let choice = raw.pointer("/choices/0").cloned().unwrap_or(Value::Null);
            (estimate_usage(&ctx.chat_history, &choice), true)
        }
    };

    let mut processed = pipeline.postprocess_response(&ctx, raw);
    processed["id"] = Value::String(ctx.request_id.clone());
    processed["model"] = Value::String(ctx.model_name.clone());
    processed["usage"] = usage.to_json();

    app_state.usage_queue.enqueue(create_usage_log(
        &ctx.request_id,
        Some(ctx.user_id),
        Some(ctx.purpose),
        &ctx.provider_name,
        &ctx.model_name,
        usage,
        is_estimated,
    ));

    Ok(Json(processed).into_response())
}
