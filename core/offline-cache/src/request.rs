//! Requests, responses and request classification.

use serde::{Deserialize, Serialize};
use url::Url;

pub const METHOD_GET: &str = "GET";

/// How the engine treats a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    /// Network-first with a runtime-store fallback.
    Api,
    /// Network-only; never read from or written to any store.
    StreamingMedia,
    /// Cache-first against the static store.
    StaticAsset,
}

impl RequestClass {
    /// Classifies a URL path. Media wins over api, so
    /// `/api/videos/7/stream` is never persisted.
    pub fn classify(path: &str) -> Self {
        if path.contains("/stream") {
            RequestClass::StreamingMedia
        } else if path.starts_with("/api/") {
            RequestClass::Api
        } else {
            RequestClass::StaticAsset
        }
    }
}

/// Cache key: method plus the full URL, query included.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestIdentity {
    pub method: String,
    pub url: String,
}

impl RequestIdentity {
    pub fn new(method: &str, url: &Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.as_str().to_string(),
        }
    }

    /// File-name safe digest of the identity.
    pub fn digest(&self) -> String {
        format!("{:x}", md5::compute(format!("{} {}", self.method, self.url)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchRequest {
    pub fn new(method: &str, url: Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(METHOD_GET, url)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == METHOD_GET
    }

    pub fn class(&self) -> RequestClass {
        RequestClass::classify(self.url.path())
    }

    pub fn identity(&self) -> RequestIdentity {
        RequestIdentity::new(&self.method, &self.url)
    }
}

/// Response snapshot: status, headers and the full body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Partial responses can't stand in for the full resource.
    pub fn is_partial(&self) -> bool {
        self.status == 206
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_api_prefix() {
        assert_eq!(RequestClass::classify("/api/videos"), RequestClass::Api);
        assert_eq!(RequestClass::classify("/api/stats/daily"), RequestClass::Api);
    }

    #[test]
    fn classify_stream_anywhere_wins() {
        assert_eq!(
            RequestClass::classify("/api/videos/42/stream"),
            RequestClass::StreamingMedia
        );
        assert_eq!(RequestClass::classify("/media/stream/1"), RequestClass::StreamingMedia);
        assert_eq!(RequestClass::classify("/livestream"), RequestClass::StaticAsset);
    }

    #[test]
    fn classify_everything_else_as_static() {
        assert_eq!(RequestClass::classify("/"), RequestClass::StaticAsset);
        assert_eq!(RequestClass::classify("/static/js/app.js"), RequestClass::StaticAsset);
        assert_eq!(RequestClass::classify("/api"), RequestClass::StaticAsset);
        assert_eq!(RequestClass::classify(""), RequestClass::StaticAsset);
    }

    #[test]
    fn identity_includes_query() {
        let a = FetchRequest::get(Url::parse("http://127.0.0.1:8000/api/videos?page=1").unwrap());
        let b = FetchRequest::get(Url::parse("http://127.0.0.1:8000/api/videos?page=2").unwrap());
        assert_ne!(a.identity(), b.identity());
        assert_ne!(a.identity().digest(), b.identity().digest());
        assert_eq!(a.identity().digest().len(), 32);
    }

    #[test]
    fn method_is_normalized() {
        let url = Url::parse("http://127.0.0.1:8000/").unwrap();
        let request = FetchRequest::new("get", url);
        assert!(request.is_get());
        assert_eq!(request.identity().method, "GET");
    }

    #[test]
    fn header_lookup_ignores_case() {
        let response = FetchResponse::new(200, "ok").with_header("Content-Type", "text/plain");
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert!(response.is_success());
        assert!(!FetchResponse::new(304, "").is_success());
    }
}
