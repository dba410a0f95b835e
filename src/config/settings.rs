use crate::error::Result as AppResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// 三个真实上游的环境变量约定：(名称, KEY 变量, BASE_URL 变量, 默认 BASE_URL, 是否需要拍平 tool 消息)
const PROVIDER_ENV: &[(&str, &str, &str, &str, bool)] = &[
    (
        "moonshot",
        "MOONSHOT_API_KEY",
        "MOONSHOT_BASE_URL",
        "https://api.moonshot.cn/v1",
        false,
    ),
    (
        "deepseek",
        "DEEPSEEK_API_KEY",
        "DEEPSEEK_BASE_URL",
        "https://api.deepseek.com",
        true,
    ),
    (
        "zai",
        "ZAI_API_KEY",
        "ZAI_BASE_URL",
        "https://api.z.ai/api/paas/v4",
        false,
    ),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    /// 供应商注册表。toml 里通常只声明 allow-list；密钥与 base_url 由环境变量覆盖
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub settlement: SettlementSettings,
    /// 鉴权与结算回源的 authority 服务（BACKEND_URL）
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub internal_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub kind: ProviderKind,
    /// 空列表表示不限制
    #[serde(default)]
    pub allowed_models: Vec<String>,
    /// DeepSeek 不接受 tool 消息携带分段 content，需要拍平成纯文本
    #[serde(default)]
    pub flatten_tool_messages: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Openai,
    Test,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
            max_redeliveries: default_max_redeliveries(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval_secs() -> u64 {
    30
}

fn default_max_redeliveries() -> u32 {
    3
}

impl Settings {
    /// 加载配置：可选的 toml 文件打底，环境变量覆盖密钥类字段
    pub fn load() -> AppResult<Self> {
        let mut settings = match Self::find_config_file() {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                toml::from_str(&content)?
            }
            None => Settings::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    fn find_config_file() -> Option<String> {
        let possible_names = ["custom-config.toml", "config.toml"];
        possible_names
            .iter()
            .find(|name| Path::new(name).exists())
            .map(|name| name.to_string())
    }

    pub fn apply_env(&mut self) {
        for (name, key_var, url_var, default_url, flatten) in PROVIDER_ENV {
            let api_key = non_empty_env(key_var);
            let base_url = non_empty_env(url_var);
            let entry = self.providers.entry(name.to_string()).or_default();
            entry.kind = ProviderKind::Openai;
            entry.flatten_tool_messages = *flatten;
            if api_key.is_some() {
                entry.api_key = api_key;
            }
            if base_url.is_some() {
                entry.base_url = base_url;
            }
            if entry.base_url.is_none() {
                entry.base_url = Some(default_url.to_string());
            }
        }

        // 内置 test 供应商：无外部依赖，供压测与联调使用
        self.providers
            .entry("test".to_string())
            .or_default()
            .kind = ProviderKind::Test;

        if let Some(url) = non_empty_env("BACKEND_URL") {
            self.backend_url = Some(url);
        }
        if let Some(secret) = non_empty_env("INTERNAL_SECRET") {
            self.internal_secret = Some(secret);
        }
    }

    /// 某供应商的模型 allow-list；空列表（或未配置）表示不限制
    pub fn allowed_models(&self, provider: &str) -> &[String] {
        self.providers
            .get(provider)
            .map(|p| p.allowed_models.as_slice())
            .unwrap_or(&[])
    }

    pub fn model_allowed(&self, provider: &str, model: &str) -> bool {
        let allow = self.allowed_models(provider);
        allow.is_empty() || allow.iter().any(|m| m == model)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
