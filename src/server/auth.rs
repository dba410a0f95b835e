use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::GatewayError;
use crate::server::AppState;
use crate::server::util::{bearer_token, mask_key};

/// `/v1/*` 的统一鉴权：校验 Bearer key，并把 key 记录塞进 extensions
/// 供下游 handler 读取 user_id / purpose
pub async fn require_api_key(
    State(app_state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let Some(token) = bearer_token(req.headers()) else {
        return Err(GatewayError::Unauthorized);
    };

    let Some(record) = app_state.key_store.get_api_key(&token).await else {
        tracing::debug!(key = %mask_key(&token), "rejected api key");
        return Err(GatewayError::Unauthorized);
    };
    // 缓存记录里 active=false 与吊销同义
    if !record.active {
        return Err(GatewayError::Unauthorized);
    }

    req.extensions_mut().insert(record);
    Ok(next.run(req).await)
}
