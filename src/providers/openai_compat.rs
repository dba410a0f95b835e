use async_trait::async_trait;
use serde_json::Value;

use super::sse::sse_line_stream;
use super::{ModelListResponse, ProviderAdapter, SseLineStream};
use crate::error::{GatewayError, Result};

/// OpenAI 兼容上游的通用客户端（DeepSeek / Moonshot / Zai 都是它的实例）
///
/// `base_url` 已包含版本路径，例如 `https://api.moonshot.cn/v1`。
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    /// DeepSeek 不接受 tool 消息的分段 content，派发前拍平成纯文本
    flatten_tool_messages: bool,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(name: &str, base_url: &str, api_key: String, flatten_tool_messages: bool) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            flatten_tool_messages,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
    }

    fn preprocess_payload(&self, payload: &Value) -> Value {
        if !self.flatten_tool_messages {
            return payload.clone();
        }
        let mut new_payload = payload.clone();
        if let Some(messages) = new_payload.get_mut("messages").and_then(Value::as_array_mut) {
            for msg in messages.iter_mut() {
                if msg.get("role").and_then(Value::as_str) == Some("tool") {
                    merge_tool_content(msg);
                }
            }
        }
        new_payload
    }

    async fn upstream_error(&self, response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::error!(provider = %self.name, %status, "upstream error: {}", body);
        GatewayError::Upstream(format!("{} returned {}", self.name, status))
    }
}

/// 把分段 content 拍平成单个字符串：文本拼接、图片与未知块降级为占位符
fn merge_tool_content(msg: &mut Value) {
    let Some(parts) = msg.get("content").and_then(Value::as_array) else {
        return;
    };
    let mut text_parts: Vec<String> = Vec::new();
    for item in parts {
        if let Some(s) = item.as_str() {
            text_parts.push(s.to_string());
            continue;
        }
        if !item.is_object() {
            text_parts.push(format!("\n[Unknown Content Block: {item}]\n"));
            continue;
        }
        match item.get("type").and_then(Value::as_str) {
            Some("text") => {
                text_parts.push(
                    item.get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                );
            }
            Some("image_url") => {
                let url = item
                    .pointer("/image_url/url")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                text_parts.push(format!("\n[Attached Image: {url}]\n"));
            }
            other => {
                let block_type = other.unwrap_or("unknown");
                text_parts.push(format!("\n[Unsupported Multimodal Block: {block_type}]\n"));
            }
        }
    }
    msg["content"] = Value::String(text_parts.concat());
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_models(&self) -> Result<ModelListResponse> {
        let response = self.request(reqwest::Method::GET, "/models").send().await?;
        if !response.status().is_success() {
            return Err(self.upstream_error(response).await);
        }
        Ok(response.json::<ModelListResponse>().await?)
    }

    async fn chat_completions(&self, payload: &Value) -> Result<Value> {
        let new_payload = self.preprocess_payload(payload);
        let response = self
            .request(reqwest::Method::POST, "/chat/completions")
            .json(&new_payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.upstream_error(response).await);
        }
        Ok(response.json::<Value>().await?)
    }

    async fn chat_completions_stream(&self, payload: &Value) -> Result<SseLineStream> {
        let new_payload = self.preprocess_payload(payload);
        let response = self
            .request(reqwest::Method::POST, "/chat/completions")
            .header("Accept", "text/event-stream")
            .json(&new_payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.upstream_error(response).await);
        }
        Ok(sse_line_stream(response))
    }
}
