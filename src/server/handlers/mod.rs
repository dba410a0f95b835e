use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;

use crate::server::{AppState, auth};

mod chat;
mod models;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping).post(ping))
        .route("/v1/models", get(models::list_models))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .with_state(state)
}

// 纯速度测试接口：无业务逻辑，仅验证鉴权与框架开销
async fn ping() -> &'static str {
    "OK"
}
