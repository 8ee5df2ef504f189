//! Read-only inspection of bearer tokens.
//!
//! Nothing here verifies a signature. Decoded claims are only good for deciding when to
//! refresh ahead of expiry and must never feed an authorization decision.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub fn decode_token(token: &str) -> Option<TokenClaims> {
    let parts: Vec<&str> = token.trim().split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let payload = parts[1].trim_end_matches('=');
    let bytes = general_purpose::URL_SAFE_NO_PAD.decode(payload).ok()?;
    let json: Value = serde_json::from_slice(&bytes).ok()?;
    if !json.is_object() {
        return None;
    }
    serde_json::from_value(json).ok()
}

pub fn is_token_expired_at(token: &str, buffer_secs: i64, now: i64) -> bool {
    match decode_token(token).and_then(|c| c.exp) {
        Some(exp) => now.saturating_add(buffer_secs) >= exp,
        None => true,
    }
}

/// True when the token expires within `buffer_secs` of now, or cannot be read.
pub fn is_token_expired(token: &str, buffer_secs: i64) -> bool {
    is_token_expired_at(token, buffer_secs, now_unix())
}

pub fn token_seconds_remaining_at(token: &str, now: i64) -> u64 {
    decode_token(token)
        .and_then(|c| c.exp)
        .map(|exp| exp.saturating_sub(now).max(0) as u64)
        .unwrap_or(0)
}

pub fn token_seconds_remaining(token: &str) -> u64 {
    token_seconds_remaining_at(token, now_unix())
}

#[cfg(test)]
pub(crate) fn make_token(claims: &Value) -> String {
    let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{body}.c2lnbmF0dXJl")
}
