use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use llm_router::authority::AuthorityClient;
use llm_router::config::SettlementSettings;
use llm_router::keystore::Purpose;
use llm_router::usage::consumer::SettlementConsumer;
use llm_router::usage::queue::UsageQueue;
use llm_router::usage::{NormalizedUsage, UsageLogEntry, create_usage_log};

fn entry(request_id: &str) -> UsageLogEntry {
    create_usage_log(
        request_id,
        Some(42),
        Some(Purpose::Default),
        "deepseek",
        "deepseek/deepseek-chat",
        NormalizedUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cached_tokens: 0,
        },
        false,
    )
}

fn fast_settings() -> SettlementSettings {
    SettlementSettings {
        batch_size: 100,
        flush_interval_secs: 1,
        max_redeliveries: 3,
    }
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached within 10s");
}

#[tokio::test]
async fn settles_a_batch_with_internal_bearer() {
    let authority = MockServer::start();
    let settle = authority.mock(|when, then| {
        when.method(POST)
            .path("/internal/usage/settle")
            .header("authorization", "Bearer internal-secret")
            .body_contains("\"requestId\":\"chatcmpl-one\"");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"success": true, "processedCount": 1}));
    });

    let client = Arc::new(AuthorityClient::new(
        Some(authority.base_url()),
        Some("internal-secret".to_string()),
    ));
    let (queue, rx) = UsageQueue::channel();
    let consumer = SettlementConsumer::new(rx, queue.clone(), client, &fast_settings());
    let handle = tokio::spawn(consumer.run());

    queue.enqueue(entry("chatcmpl-one"));
    wait_for(|| settle.hits() >= 1).await;
    assert_eq!(settle.hits(), 1);
    handle.abort();
}

#[tokio::test]
async fn nacked_batch_is_redelivered_then_acked_exactly_once() {
    let authority = MockServer::start();
    let mut failing = authority.mock(|when, then| {
        when.method(POST).path("/internal/usage/settle");
        then.status(503);
    });

    let client = Arc::new(AuthorityClient::new(
        Some(authority.base_url()),
        Some("internal-secret".to_string()),
    ));
    let (queue, rx) = UsageQueue::channel();
    let consumer = SettlementConsumer::new(rx, queue.clone(), client, &fast_settings());
    let handle = tokio::spawn(consumer.run());

    queue.enqueue(entry("chatcmpl-retry"));
    wait_for(|| failing.hits() >= 1).await;

    // authority 恢复：后续重投应当成功且只成功一次
    failing.delete();
    let ok = authority.mock(|when, then| {
        when.method(POST).path("/internal/usage/settle");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"success": true, "processedCount": 1}));
    });

    wait_for(|| ok.hits() >= 1).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(ok.hits(), 1);
    handle.abort();
}

#[tokio::test]
async fn poison_entry_is_dropped_after_redelivery_limit() {
    let authority = MockServer::start();
    let failing = authority.mock(|when, then| {
        when.method(POST).path("/internal/usage/settle");
        then.status(500);
    });

    let client = Arc::new(AuthorityClient::new(
        Some(authority.base_url()),
        Some("internal-secret".to_string()),
    ));
    let (queue, rx) = UsageQueue::channel();
    let settings = SettlementSettings {
        batch_size: 100,
        flush_interval_secs: 1,
        max_redeliveries: 2,
    };
    let consumer = SettlementConsumer::new(rx, queue.clone(), client, &settings);
    let handle = tokio::spawn(consumer.run());

    queue.enqueue(entry("chatcmpl-poison"));
    // 首投 + 2 次重投后丢弃
    wait_for(|| failing.hits() >= 3).await;
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(failing.hits(), 3);
    handle.abort();
}

#[tokio::test]
async fn missing_settlement_config_is_an_error_not_a_silent_ack() {
    let client = AuthorityClient::new(None, None);
    let result = client.settle_usage(&[entry("chatcmpl-x")]).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn empty_batch_never_posts() {
    let authority = MockServer::start();
    let settle = authority.mock(|when, then| {
        when.method(POST).path("/internal/usage/settle");
        then.status(200).json_body(json!({"processedCount": 0}));
    });

    let client = Arc::new(AuthorityClient::new(
        Some(authority.base_url()),
        Some("internal-secret".to_string()),
    ));
    let (queue, rx) = UsageQueue::channel();
    let consumer = SettlementConsumer::new(rx, queue.clone(), client, &fast_settings());
    let handle = tokio::spawn(consumer.run());

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(settle.hits(), 0);
    handle.abort();
}
