use serde_json::{Value, json};

use super::{Pipeline, PipelineContext, SseTransform};

const THINK_BOS: &str = "<think>\n";
const THINK_EOS: &str = "\n</think>";

/// 面向只认 `content` 的客户端（如 Cursor）的改写管道：
/// 上行把 `<think>` 块还原为 `reasoning_content`，下行把
/// `reasoning_content` 折回 `<think>` 标记包裹的普通 content。
pub struct CursorPipeline;

/// 从文本里切出 think 块；没有完整的 BOS/EOS 对则原样返回
fn extract_think_and_answer(text: &str) -> (Option<String>, String) {
    if let (Some(bos), Some(eos)) = (text.find(THINK_BOS), text.find(THINK_EOS)) {
        if bos < eos {
            let think = &text[bos + THINK_BOS.len()..eos];
            let wrapped = format!("{THINK_BOS}{think}{THINK_EOS}");
            return (Some(think.to_string()), text.replacen(&wrapped, "", 1));
        }
    }
    (None, text.to_string())
}

impl Pipeline for CursorPipeline {
    fn preprocess_request(&self, ctx: &PipelineContext, mut payload: Value) -> Value {
        let Some(messages) = payload.get_mut("messages").and_then(Value::as_array_mut) else {
            return payload;
        };
        for msg in messages.iter_mut() {
            if msg.get("role").and_then(Value::as_str) != Some("assistant") {
                continue;
            }
            // 只处理分段 content（字符串 content 原样通过）
            let Some(text) = msg
                .pointer("/content/0/text")
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                continue;
            };
            let (think, answer) = extract_think_and_answer(&text);
            let Some(think) = think else {
                continue;
            };
            tracing::debug!(request_id = %ctx.request_id, "restored reasoning from <think> block");
            msg["reasoning_content"] = Value::String(think);
            msg["content"] = if answer.is_empty() {
                json!([])
            } else {
                json!([{ "type": "text", "text": answer }])
            };
        }
        payload
    }

    fn postprocess_response(&self, _ctx: &PipelineContext, mut raw: Value) -> Value {
        let Some(message) = raw
            .pointer_mut("/choices/0/message")
            .and_then(Value::as_object_mut)
        else {
            return raw;
        };
        let reasoning = message
            .get("reasoning_content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if reasoning.is_empty() {
            return raw;
        }
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let merged = format!("{THINK_BOS}{reasoning}{THINK_EOS}{content}");
        message.insert("content".to_string(), Value::String(merged));
        message.remove("reasoning_content");
        raw
    }

    fn transformer(&self) -> Box<dyn SseTransform> {
        Box::new(CursorTransform {
            reasoning_flag: false,
        })
    }
}

/// 下行事件状态机：`reasoning_flag` 标记当前是否处于 think 块内
struct CursorTransform {
    reasoning_flag: bool,
}

/// 以原事件为模板合成一个纯 content 事件；finish_reason 压成 null
fn with_content_delta(base: &Value, text: &str) -> Value {
    let mut out = base.clone();
    out["choices"][0]["delta"] = json!({ "content": text });
    out["choices"][0]["finish_reason"] = Value::Null;
    out
}

impl SseTransform for CursorTransform {
    fn transform(&mut self, data: Value) -> Vec<Value> {
        let reasoning = data
            .pointer("/choices/0/delta/reasoning_content")
            .and_then(Value::as_str)
            .map(str::to_string);
        if data.pointer("/choices/0").is_none() {
            return vec![data];
        }

        match (self.reasoning_flag, reasoning) {
            (false, Some(reasoning)) => {
                self.reasoning_flag = true;
                vec![
                    with_content_delta(&data, THINK_BOS),
                    with_content_delta(&data, &reasoning),
                ]
            }
            (true, Some(reasoning)) => vec![with_content_delta(&data, &reasoning)],
            (true, None) => {
                self.reasoning_flag = false;
                vec![with_content_delta(&data, THINK_EOS), data]
            }
            (false, None) => vec![data],
        }
    }
}
