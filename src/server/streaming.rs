use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header;
use axum::response::Response;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::GatewayError;
use crate::pipeline::{Pipeline, PipelineContext, SseTransform};
use crate::providers::{ProviderAdapter, SseLineStream};
use crate::server::AppState;
use crate::usage::queue::UsageQueue;
use crate::usage::tracker::StreamTracker;
use crate::usage::{create_usage_log, estimate_prompt_tokens, normalize_usage};

/// 下行写端的有界容量：泵在 send 上阻塞，客户端不拉取时上游读取随之停住
const DOWNSTREAM_CHANNEL_CAPACITY: usize = 16;

/// 流式路径：打开上游 SSE，逐行改写后转发给客户端。
/// 上游打开失败直接 500，不记用量；流一旦开始，无论如何收尾
/// （正常冲洗、客户端断开、上游报错）都恰好入队一条用量日志。
pub async fn stream_chat(
    app_state: Arc<AppState>,
    pipeline: Arc<dyn Pipeline>,
    provider: Arc<dyn ProviderAdapter>,
    ctx: PipelineContext,
    payload: Value,
) -> Result<Response, GatewayError> {
    let upstream = provider.chat_completions_stream(&payload).await.map_err(|e| {
        tracing::error!(request_id = %ctx.request_id, "failed to open upstream stream: {}", e);
        GatewayError::Upstream(e.to_string())
    })?;

    let transformer = pipeline.transformer();
    let finalizer = StreamFinalizer::new(app_state.usage_queue.clone(), &ctx);

    let (tx, rx) = mpsc::channel::<Result<String, Infallible>>(DOWNSTREAM_CHANNEL_CAPACITY);
    tokio::spawn(pump(upstream, tx, transformer, finalizer, ctx));

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(
        header::CONNECTION,
        header::HeaderValue::from_static("keep-alive"),
    );
    Ok(response)
}

enum FinalizeReason {
    Flush,
    Abort,
    PumpError,
}

impl FinalizeReason {
    fn as_str(&self) -> &'static str {
        match self {
            FinalizeReason::Flush => "flush",
            FinalizeReason::Abort => "abort",
            FinalizeReason::PumpError => "pump_error",
        }
    }
}

/// 恰好一次的流收尾器：持有 tracker 与记账元数据。
/// 四个触发路径（冲洗 / 客户端断开 / 泵错误 / 任务被 Drop）全部汇到
/// `finalize`，`finalized` 布尔保证只入队一条日志。
struct StreamFinalizer {
    queue: UsageQueue,
    tracker: StreamTracker,
    request_id: String,
    provider_name: String,
    model_name: String,
    user_id: i64,
    purpose: crate::keystore::Purpose,
    estimated_prompt_tokens: u32,
    finalized: bool,
}

impl StreamFinalizer {
    fn new(queue: UsageQueue, ctx: &PipelineContext) -> Self {
        Self {
            queue,
            tracker: StreamTracker::new(),
            request_id: ctx.request_id.clone(),
            provider_name: ctx.provider_name.clone(),
            model_name: ctx.model_name.clone(),
            user_id: ctx.user_id,
            purpose: ctx.purpose,
            estimated_prompt_tokens: estimate_prompt_tokens(&ctx.chat_history),
            finalized: false,
        }
    }

    fn tracker_mut(&mut self) -> &mut StreamTracker {
        &mut self.tracker
    }

    fn finalize(&mut self, reason: FinalizeReason) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        let usage = self.tracker.build_usage(self.estimated_prompt_tokens, 0);
        let is_estimated = !self.tracker.has_received_usage();
        tracing::info!(
            request_id = %self.request_id,
            reason = reason.as_str(),
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            is_estimated,
            "stream finalized"
        );
        self.queue.enqueue(create_usage_log(
            &self.request_id,
            Some(self.user_id),
            Some(self.purpose),
            &self.provider_name,
            &self.model_name,
            usage,
            is_estimated,
        ));
    }
}

impl Drop for StreamFinalizer {
    // 泵异常退出的保险丝：未收尾就按 abort 记账
    fn drop(&mut self) {
        self.finalize(FinalizeReason::Abort);
    }
}

/// 泵任务：上游一行进，零或多行出，顺序保持。
/// 对下行 send 的 await 即背压；send 失败说明客户端已断开。
async fn pump(
    mut upstream: SseLineStream,
    tx: mpsc::Sender<Result<String, Infallible>>,
    mut transformer: Box<dyn SseTransform>,
    mut finalizer: StreamFinalizer,
    ctx: PipelineContext,
) {
    while let Some(item) = upstream.next().await {
        let line = match item {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(request_id = %ctx.request_id, "upstream stream error: {}", e);
                finalizer.finalize(FinalizeReason::PumpError);
                return;
            }
        };
        let line = line.trim();

        // 空行、非 data 行、[DONE] 哨兵：原样透传
        if line.is_empty() || !line.starts_with("data:") || line == "data: [DONE]" {
            if tx.send(Ok(format!("{line}\n\n"))).await.is_err() {
                finalizer.finalize(FinalizeReason::Abort);
                return;
            }
            continue;
        }

        let payload = line["data:".len()..].trim_start();
        let mut data: Value = match serde_json::from_str(payload) {
            Ok(data) => data,
            Err(e) => {
                // 解析失败的行原样转发并继续，不中断流
                tracing::warn!(request_id = %ctx.request_id, "unparseable SSE line: {}", e);
                if tx.send(Ok(format!("{line}\n\n"))).await.is_err() {
                    finalizer.finalize(FinalizeReason::Abort);
                    return;
                }
                continue;
            }
        };

        if !data.is_object() {
            // 合法 JSON 但不是事件对象：序列化转发，不做改写
            if tx.send(Ok(format!("data: {data}\n\n"))).await.is_err() {
                finalizer.finalize(FinalizeReason::Abort);
                return;
            }
            continue;
        }

        rewrite_event(&mut data, &ctx);
        track_delta(finalizer.tracker_mut(), &data);

        if let Some(raw_usage) = data.get("usage") {
            if !raw_usage.is_null() {
                if let Some(usage) = normalize_usage(raw_usage) {
                    finalizer.tracker_mut().record_actual_usage(usage);
                    data["usage"] = usage.to_json();
                }
            }
        }

        for event in transformer.transform(data) {
            if tx.send(Ok(format!("data: {event}\n\n"))).await.is_err() {
                finalizer.finalize(FinalizeReason::Abort);
                return;
            }
        }
    }

    finalizer.finalize(FinalizeReason::Flush);
}

/// 下行事件统一整形：id 对齐网关请求 ID，model 改回公开名，
/// 抹掉上游的 system_fingerprint
fn rewrite_event(data: &mut Value, ctx: &PipelineContext) {
    data["id"] = Value::String(ctx.request_id.clone());
    data["model"] = Value::String(ctx.model_name.clone());
    if let Some(obj) = data.as_object_mut() {
        obj.remove("system_fingerprint");
    }
}

fn track_delta(tracker: &mut StreamTracker, data: &Value) {
    let Some(delta) = data.pointer("/choices/0/delta") else {
        return;
    };
    if let Some(content) = delta.get("content").and_then(Value::as_str) {
        tracker.track_content(content);
    }
    if let Some(reasoning) = delta.get("reasoning_content").and_then(Value::as_str) {
        tracker.track_content(reasoning);
    }
    if let Some(tool_calls) = delta.get("tool_calls") {
        if !tool_calls.is_null() {
            tracker.track_content(&tool_calls.to_string());
        }
    }
}
