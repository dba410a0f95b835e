pub mod handlers;
pub(crate) mod auth;
pub(crate) mod model_parser;
pub(crate) mod streaming;
pub(crate) mod util;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;

use crate::authority::AuthorityClient;
use crate::config::Settings;
use crate::error::Result as AppResult;
use crate::keystore::ApiKeyStore;
use crate::kv::{KvCache, MemoryKv};
use crate::providers::{ProviderAdapter, build_providers};
use crate::usage::consumer::SettlementConsumer;
use crate::usage::queue::UsageQueue;

#[derive(Clone)]
pub struct AppState {
    pub config: Settings,
    pub providers: BTreeMap<String, Arc<dyn ProviderAdapter>>,
    pub key_store: ApiKeyStore,
    pub kv: Arc<dyn KvCache>,
    pub usage_queue: UsageQueue,
}

/// 组装共享状态与结算消费者；消费者由调用方（main 或测试）spawn
pub fn build_state(config: Settings) -> (Arc<AppState>, SettlementConsumer) {
    let kv: Arc<dyn KvCache> = Arc::new(MemoryKv::new());
    let authority = Arc::new(AuthorityClient::new(
        config.backend_url.clone(),
        config.internal_secret.clone(),
    ));
    let key_store = ApiKeyStore::new(kv.clone(), authority.clone());
    let providers = build_providers(&config);
    let (usage_queue, usage_rx) = UsageQueue::channel();
    let consumer = SettlementConsumer::new(
        usage_rx,
        usage_queue.clone(),
        authority,
        &config.settlement,
    );

    let state = Arc::new(AppState {
        config,
        providers,
        key_store,
        kv,
        usage_queue,
    });
    (state, consumer)
}

pub async fn create_app(config: Settings) -> AppResult<Router> {
    let (state, consumer) = build_state(config);
    tokio::spawn(consumer.run());
    Ok(handlers::routes(state))
}
