use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream;
use serde_json::{Value, json};

use super::{Model, ModelListResponse, ProviderAdapter, SseLineStream};
use crate::error::Result;

/// 压测用的合成供应商：不触达外部 API，返回固定或按关键词定制的响应。
/// 用来测网关自身的开销，分块数量与块间延迟可配。
pub struct TestProvider {
    name: String,
    fixed_response: String,
    stream_chunk_count: usize,
    stream_chunk_delay: Duration,
}

impl TestProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fixed_response: "This is a test response from TestProvider.".to_string(),
            stream_chunk_count: 10,
            stream_chunk_delay: Duration::ZERO,
        }
    }

    pub fn with_response(mut self, response: &str) -> Self {
        self.fixed_response = response.to_string();
        self
    }

    pub fn with_chunks(mut self, count: usize, delay: Duration) -> Self {
        self.stream_chunk_count = count.max(1);
        self.stream_chunk_delay = delay;
        self
    }

    fn last_user_message(payload: &Value) -> String {
        payload
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| {
                messages
                    .iter()
                    .rev()
                    .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
            })
            .and_then(|m| m.get("content").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string()
    }

    fn response_for(&self, user_message: &str) -> String {
        let lower = user_message.to_lowercase();
        if lower.contains("hello") || lower.contains("hi") {
            "Hello! This is TestProvider speaking.".to_string()
        } else if lower.contains("long") || lower.contains("paragraph") {
            "This is a longer response for testing purposes. ".repeat(5)
        } else {
            self.fixed_response.clone()
        }
    }

    fn split_content(content: &str, chunks: usize) -> Vec<String> {
        let words: Vec<&str> = content.split_whitespace().collect();
        if words.is_empty() {
            return vec![content.to_string()];
        }
        if chunks >= words.len() {
            return words.iter().map(|w| w.to_string()).collect();
        }
        let chunk_size = words.len() / chunks;
        (0..chunks)
            .map(|i| {
                let start = i * chunk_size;
                let end = if i == chunks - 1 {
                    words.len()
                } else {
                    (i + 1) * chunk_size
                };
                words[start..end].join(" ")
            })
            .collect()
    }
}

#[async_trait]
impl ProviderAdapter for TestProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_models(&self) -> Result<ModelListResponse> {
        let created = Utc::now().timestamp() as u64;
        let data = ["test-fast", "test-slow", "test-stream"]
            .iter()
            .map(|id| Model {
                id: id.to_string(),
                object: "model".to_string(),
                created,
                owned_by: "test-provider".to_string(),
            })
            .collect();
        Ok(ModelListResponse {
            object: "list".to_string(),
            data,
        })
    }

    async fn chat_completions(&self, payload: &Value) -> Result<Value> {
        let model = payload
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("test-model");
        let user_message = Self::last_user_message(payload);
        let content = self.response_for(&user_message);
        let now = Utc::now();

        let prompt_tokens = user_message.split_whitespace().count() * 2;
        let completion_tokens = content.split_whitespace().count();
        Ok(json!({
            "id": format!("test-{}", now.timestamp_millis()),
            "object": "chat.completion",
            "created": now.timestamp(),
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop",
            }],
            "usage": {
                "prompt_tokens": prompt_tokens,
                "completion_tokens": completion_tokens,
                "total_tokens": prompt_tokens + completion_tokens,
            },
        }))
    }

    async fn chat_completions_stream(&self, payload: &Value) -> Result<SseLineStream> {
        let model = payload
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("test-model")
            .to_string();
        let user_message = Self::last_user_message(payload);
        let content = self.response_for(&user_message);
        let chunks = Self::split_content(&content, self.stream_chunk_count);
        let now = Utc::now();
        let id = format!("test-{}", now.timestamp_millis());
        let created = now.timestamp();

        let total = chunks.len();
        let mut lines: Vec<String> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let last = i == total - 1;
                let data = json!({
                    "id": id,
                    "object": "chat.completion.chunk",
                    "created": created,
                    "model": model,
                    "choices": [{
                        "index": 0,
                        "delta": {"content": if last { chunk } else { format!("{chunk} ") }},
                        "finish_reason": if last { Value::from("stop") } else { Value::Null },
                    }],
                });
                format!("data: {data}")
            })
            .collect();
        lines.push("data: [DONE]".to_string());

        let delay = self.stream_chunk_delay;
        let stream = stream::iter(lines.into_iter().map(Ok::<_, crate::error::GatewayError>)).then(
            move |line| async move {
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                line
            },
        );
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    #[tokio::test]
    async fn keyword_tailors_the_response() {
        let provider = TestProvider::new("test");
        let payload = json!({
            "model": "test-fast",
            "messages": [{"role": "user", "content": "Hello"}],
        });
        let data = provider.chat_completions(&payload).await.unwrap();
        assert_eq!(
            data["choices"][0]["message"]["content"],
            "Hello! This is TestProvider speaking."
        );
        assert!(data["usage"]["total_tokens"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn stream_ends_with_done_sentinel() {
        let provider = TestProvider::new("test").with_chunks(3, Duration::ZERO);
        let payload = json!({
            "model": "test-stream",
            "messages": [{"role": "user", "content": "say something"}],
        });
        let lines: Vec<String> = provider
            .chat_completions_stream(&payload)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(lines.len() >= 2);
        assert_eq!(lines.last().unwrap(), "data: [DONE]");
        let first: Value =
            serde_json::from_str(lines[0].strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(first["object"], "chat.completion.chunk");
        assert_eq!(first["choices"][0]["finish_reason"], Value::Null);
    }

    #[tokio::test]
    async fn lists_fixed_model_catalog() {
        let provider = TestProvider::new("test");
        let models = provider.list_models().await.unwrap();
        let ids: Vec<&str> = models.data.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["test-fast", "test-slow", "test-stream"]);
    }
}
