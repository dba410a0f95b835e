pub mod cursor;

use std::sync::Arc;

use serde_json::Value;

use crate::keystore::Purpose;

pub use cursor::CursorPipeline;

/// 随请求流转的管道上下文
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub request_id: String,
    /// 对外公开的模型名（带 provider 前缀）
    pub model_name: String,
    pub provider_name: String,
    /// 预处理后的 messages，供用量估算使用
    pub chat_history: Vec<Value>,
    pub user_id: i64,
    pub purpose: Purpose,
}

/// 单条 SSE 事件的有状态变换：一进零出、一出或多出
pub trait SseTransform: Send {
    fn transform(&mut self, data: Value) -> Vec<Value>;
}

/// 按 key 用途选择的请求/响应/事件三段变换
pub trait Pipeline: Send + Sync {
    fn preprocess_request(&self, ctx: &PipelineContext, payload: Value) -> Value;

    fn postprocess_response(&self, ctx: &PipelineContext, raw: Value) -> Value;

    /// 每条流各自持有一个变换器实例（内部可带状态）
    fn transformer(&self) -> Box<dyn SseTransform>;
}

/// 默认管道：三段全部恒等
pub struct BasePipeline;

struct IdentityTransform;

impl SseTransform for IdentityTransform {
    fn transform(&mut self, data: Value) -> Vec<Value> {
        vec![data]
    }
}

impl Pipeline for BasePipeline {
    fn preprocess_request(&self, _ctx: &PipelineContext, payload: Value) -> Value {
        payload
    }

    fn postprocess_response(&self, _ctx: &PipelineContext, raw: Value) -> Value {
        raw
    }

    fn transformer(&self) -> Box<dyn SseTransform> {
        Box::new(IdentityTransform)
    }
}

pub fn pipeline_for(purpose: Purpose) -> Arc<dyn Pipeline> {
    match purpose {
        Purpose::Cursor => Arc::new(CursorPipeline),
        Purpose::Default => Arc::new(BasePipeline),
    }
}
