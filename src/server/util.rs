use axum::http::HeaderMap;
use rand::Rng;

// HTTP helpers
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

// Key masking for logs (DRY across modules)
pub fn mask_key(key: &str) -> String {
    if key.len() <= 8 {
        return "****".to_string();
    }
    let (start, end) = (&key[..4], &key[key.len() - 4..]);
    format!("{}****{}", start, end)
}

const REQUEST_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const REQUEST_ID_LEN: usize = 32;

/// 全局唯一请求 ID：`chatcmpl-` + 32 位 base36，同时作为下行事件的 `id`
pub fn generate_request_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..REQUEST_ID_LEN)
        .map(|_| REQUEST_ID_ALPHABET[rng.random_range(0..REQUEST_ID_ALPHABET.len())] as char)
        .collect();
    format!("chatcmpl-{suffix}")
}
