use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::error::{GatewayError, Result};
use crate::keystore::{ApiKeyRecord, Purpose};
use crate::usage::UsageLogEntry;

/// key 校验的四种结果，分别对应不同的负缓存策略
#[derive(Debug)]
pub enum VerifyOutcome {
    Valid(ApiKeyRecord),
    Revoked,
    NotFound,
    Error(String),
}

#[derive(Debug, Deserialize)]
struct KeyVerifyResponse {
    user_id: i64,
    is_active: bool,
    #[serde(default)]
    purpose: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleResponse {
    #[serde(default)]
    processed_count: u64,
}

/// authority（用户与计费服务）的内部 HTTP 客户端
pub struct AuthorityClient {
    client: reqwest::Client,
    backend_url: Option<String>,
    internal_secret: Option<String>,
}

impl AuthorityClient {
    pub fn new(backend_url: Option<String>, internal_secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            backend_url: backend_url.map(|u| u.trim_end_matches('/').to_string()),
            internal_secret,
        }
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        match (self.backend_url.as_deref(), self.internal_secret.as_deref()) {
            (Some(url), Some(secret)) => Some((url, secret)),
            _ => None,
        }
    }

    pub async fn verify_key(&self, key: &str) -> VerifyOutcome {
        let Some((base, secret)) = self.credentials() else {
            return VerifyOutcome::Error("authority not configured".to_string());
        };

        let response = self
            .client
            .post(format!("{}/internal/keys/verify", base))
            .bearer_auth(secret)
            .json(&json!({ "key": key }))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return VerifyOutcome::Error(e.to_string()),
        };

        match response.status() {
            s if s.is_success() => match response.json::<KeyVerifyResponse>().await {
                Ok(body) => VerifyOutcome::Valid(ApiKeyRecord {
                    user_id: body.user_id,
                    active: body.is_active,
                    purpose: Purpose::parse(body.purpose.as_deref().unwrap_or("default")),
                }),
                Err(e) => VerifyOutcome::Error(format!("bad verify response: {e}")),
            },
            StatusCode::FORBIDDEN => VerifyOutcome::Revoked,
            StatusCode::NOT_FOUND => VerifyOutcome::NotFound,
            other => VerifyOutcome::Error(format!("authority returned {other}")),
        }
    }

    /// 批量上报用量；非 2xx 与传输错误都作为 Err 交给消费者 nack
    pub async fn settle_usage(&self, entries: &[UsageLogEntry]) -> Result<u64> {
        let Some((base, secret)) = self.credentials() else {
            // 配置缺失必须显式失败，不能吞掉
            return Err(GatewayError::Config(
                "BACKEND_URL / INTERNAL_SECRET not configured for settlement".to_string(),
            ));
        };

        let response = self
            .client
            .post(format!("{}/internal/usage/settle", base))
            .bearer_auth(secret)
            .json(&json!({ "entries": entries }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Upstream(format!(
                "settlement returned {status}"
            )));
        }

        let body: SettleResponse = response.json().await.unwrap_or(SettleResponse {
            processed_count: entries.len() as u64,
        });
        Ok(body.processed_count)
    }
}
