use std::sync::Arc;

use axum::Router;
use httpmock::prelude::*;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use llm_router::authority::AuthorityClient;
use llm_router::config::{ProviderConfig, ProviderKind, Settings};
use llm_router::keystore::ApiKeyStore;
use llm_router::kv::{KvCache, MemoryKv};
use llm_router::providers::build_providers;
use llm_router::server::{AppState, handlers};
use llm_router::usage::queue::{Delivery, UsageQueue};

pub struct TestHarness {
    pub app: Router,
    pub state: Arc<AppState>,
    pub usage_rx: UnboundedReceiver<Delivery>,
}

/// 按给定 Settings 手工组装 AppState，结算队列的消费端交给测试侧检查
pub fn build_harness(settings: Settings) -> TestHarness {
    let kv: Arc<dyn KvCache> = Arc::new(MemoryKv::new());
    let authority = Arc::new(AuthorityClient::new(
        settings.backend_url.clone(),
        settings.internal_secret.clone(),
    ));
    let key_store = ApiKeyStore::new(kv.clone(), authority);
    let providers = build_providers(&settings);
    let (usage_queue, usage_rx) = UsageQueue::channel();

    let state = Arc::new(AppState {
        config: settings,
        providers,
        key_store,
        kv,
        usage_queue,
    });
    let app = handlers::routes(state.clone());
    TestHarness {
        app,
        state,
        usage_rx,
    }
}

/// 指向 mock authority 的最小配置，并注册一个 OpenAI 兼容的 mock 上游
pub fn settings_with_upstream(
    authority: &MockServer,
    provider_name: &str,
    upstream_base_url: &str,
) -> Settings {
    let mut settings = base_settings(authority);
    settings.providers.insert(
        provider_name.to_string(),
        ProviderConfig {
            base_url: Some(upstream_base_url.to_string()),
            api_key: Some("sk-upstream".to_string()),
            kind: ProviderKind::Openai,
            allowed_models: vec![],
            flatten_tool_messages: false,
        },
    );
    settings
}

pub fn base_settings(authority: &MockServer) -> Settings {
    let mut settings = Settings::default();
    settings.backend_url = Some(authority.base_url());
    settings.internal_secret = Some("internal-secret".to_string());
    settings
}

/// authority 对 `key` 的校验放行（带 purpose）
pub fn mock_verify_ok<'a>(
    authority: &'a MockServer,
    key: &str,
    purpose: &str,
) -> httpmock::Mock<'a> {
    let body = json!({ "key": key });
    let response = json!({
        "key_value": key,
        "user_id": 42,
        "is_active": true,
        "purpose": purpose,
    });
    authority.mock(|when, then| {
        when.method(POST)
            .path("/internal/keys/verify")
            .header("authorization", "Bearer internal-secret")
            .json_body(body);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(response);
    })
}

pub fn auth_request(
    method: &str,
    uri: &str,
    key: &str,
    body: axum::body::Body,
) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {key}"))
        .header("content-type", "application/json")
        .body(body)
        .unwrap()
}
