use std::convert::Infallible;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, HeaderValue, header, request::Parts},
    response::{IntoResponseParts, ResponseParts},
};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session_id";

/// Browser session identified by the `session_id` cookie. A fresh id is
/// minted when the cookie is missing or malformed, and set on the response.
#[derive(Debug, Clone)]
pub struct BrowserSession {
    pub id: String,
    is_new: bool,
}

impl BrowserSession {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        match cookie_value(headers, SESSION_COOKIE).filter(|v| is_valid_session_id(v)) {
            Some(id) => Self { id, is_new: false },
            None => Self {
                id: Uuid::new_v4().to_string(),
                is_new: true,
            },
        }
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for BrowserSession {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

impl IntoResponseParts for BrowserSession {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        if self.is_new {
            let cookie = format!("{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax", self.id);
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                res.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        Ok(res)
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
}

fn is_valid_session_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn existing_cookie_is_reused() {
        let session = BrowserSession::from_headers(&headers("theme=dark; session_id=abc-123"));
        assert_eq!(session.id, "abc-123");
        assert!(!session.is_new());
    }

    #[test]
    fn missing_cookie_mints_uuid() {
        let session = BrowserSession::from_headers(&HeaderMap::new());
        assert!(session.is_new());
        assert!(Uuid::parse_str(&session.id).is_ok());
    }

    #[test]
    fn malformed_cookie_is_replaced() {
        let session = BrowserSession::from_headers(&headers("session_id=<script>"));
        assert!(session.is_new());
        assert_ne!(session.id, "<script>");
    }
}
