use axum::http::HeaderMap;
use base64ct::{Base64UrlUnpadded, Encoding};

use crate::session::cookie_value;

/// The `(series, token)` pair as carried in the client's cookie:
/// `base64url(series ":" token)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RememberMeCookie {
    pub series: String,
    pub token_value: String,
}

impl RememberMeCookie {
    pub fn new(series: impl Into<String>, token_value: impl Into<String>) -> Self {
        Self {
            series: series.into(),
            token_value: token_value.into(),
        }
    }

    pub fn encode(&self) -> String {
        Base64UrlUnpadded::encode_string(format!("{}:{}", self.series, self.token_value).as_bytes())
    }

    pub fn decode(value: &str) -> Option<Self> {
        let bytes = Base64UrlUnpadded::decode_vec(value.trim()).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        let (series, token) = text.split_once(':')?;
        if series.is_empty() || token.is_empty() || token.contains(':') {
            return None;
        }
        Some(Self::new(series, token))
    }

    /// Raw cookie value, if the client sent one under `name`.
    pub fn raw_from_headers(headers: &HeaderMap, name: &str) -> Option<String> {
        cookie_value(headers, name)
    }

    pub fn to_cookie_header(&self, name: &str, max_age: i64, secure: bool) -> String {
        format!(
            "{}={}; HttpOnly; {}SameSite=Lax; Path=/; Max-Age={}",
            name,
            self.encode(),
            if secure { "Secure; " } else { "" },
            max_age
        )
    }

    pub fn delete_cookie_header(name: &str) -> String {
        format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", name)
    }
}
