pub mod consumer;
pub mod queue;
pub mod tracker;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::keystore::Purpose;

/// 归一化后的用量；上游字段形态不一，统一收敛到这四个字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cached_tokens: u32,
}

impl NormalizedUsage {
    pub fn to_json(self) -> Value {
        serde_json::json!({
            "prompt_tokens": self.prompt_tokens,
            "completion_tokens": self.completion_tokens,
            "total_tokens": self.total_tokens,
            "cached_tokens": self.cached_tokens,
        })
    }
}

/// 发往 authority 结算接口的用量条目（字段名与对端 camelCase 契约一致）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLogEntry {
    pub request_id: String,
    /// 毫秒时间戳
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    pub provider_name: String,
    /// 带 provider 前缀的公开模型名，如 `deepseek/deepseek-chat`
    pub model_name: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cached_tokens: u32,
    pub total_tokens: u32,
    pub is_estimated: bool,
}

/// 从上游原始 usage 对象提取四元组；prompt/completion 缺失则放弃并由调用方退回估算
pub fn normalize_usage(raw: &Value) -> Option<NormalizedUsage> {
    let prompt = raw.get("prompt_tokens").and_then(Value::as_u64);
    let completion = raw.get("completion_tokens").and_then(Value::as_u64);
    let (Some(prompt), Some(completion)) = (prompt, completion) else {
        tracing::warn!("upstream usage missing prompt/completion tokens: {}", raw);
        return None;
    };

    let total = raw
        .get("total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(prompt + completion);
    // cached 字段在各家上游有三种写法，按优先级取第一个命中的
    let cached = raw
        .get("cached_tokens")
        .and_then(Value::as_u64)
        .or_else(|| {
            raw.pointer("/prompt_tokens_details/cached_tokens")
                .and_then(Value::as_u64)
        })
        .or_else(|| raw.get("prompt_cache_hit_tokens").and_then(Value::as_u64))
        .unwrap_or(0);

    Some(NormalizedUsage {
        prompt_tokens: prompt as u32,
        completion_tokens: completion as u32,
        total_tokens: total as u32,
        cached_tokens: cached as u32,
    })
}

/// 字符数到 token 的粗略估算：每 2 个字符 1 token，下限 1
pub fn estimate_tokens_from_chars(chars: usize) -> u32 {
    (chars.div_ceil(2)).max(1) as u32
}

fn content_chars(message: &Value) -> usize {
    message
        .get("content")
        .map(|c| c.to_string().chars().count())
        .unwrap_or(0)
}

pub fn estimate_prompt_tokens(messages: &[Value]) -> u32 {
    let chars: usize = messages.iter().map(content_chars).sum();
    estimate_tokens_from_chars(chars)
}

/// 上游既没给 usage 又要记账时的兜底：按序列化字符数估算
pub fn estimate_usage(messages: &[Value], completion_choice: &Value) -> NormalizedUsage {
    let prompt_tokens = estimate_prompt_tokens(messages);
    let completion_chars = completion_choice.to_string().chars().count();
    let completion_tokens = estimate_tokens_from_chars(completion_chars);
    NormalizedUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
        cached_tokens: 0,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn create_usage_log(
    request_id: &str,
    user_id: Option<i64>,
    purpose: Option<Purpose>,
    provider_name: &str,
    model_name: &str,
    usage: NormalizedUsage,
    is_estimated: bool,
) -> UsageLogEntry {
    UsageLogEntry {
        request_id: request_id.to_string(),
        timestamp: Utc::now().timestamp_millis(),
        user_id,
        purpose: purpose.map(|p| p.as_str().to_string()),
        provider_name: provider_name.to_string(),
        model_name: model_name.to_string(),
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        cached_tokens: usage.cached_tokens,
        total_tokens: usage.total_tokens,
        is_estimated,
    }
}
