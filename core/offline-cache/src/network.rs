//! Network access for the cache engine.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::request::{FetchRequest, FetchResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Performs a request. Any HTTP status is a successful fetch; only transport
/// failures are errors.
pub trait Network: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// Blocking HTTP client. Must not be used from inside an async task.
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| CacheError::Client(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Network for HttpNetwork {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let url = request.url.as_str();
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|err| CacheError::network(url, err.to_string()))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            if is_hop_by_hop(name) {
                continue;
            }
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                debug!(header = %name, "Dropping unrepresentable request header");
                continue;
            };
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .map_err(|err| CacheError::network(url, err.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .map_err(|err| CacheError::network(url, err.to_string()))?
            .to_vec();

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_recognized() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("range"));
    }

    #[test]
    fn refused_connection_is_a_network_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let network = HttpNetwork::new().unwrap();
        let url = format!("http://127.0.0.1:{}/api/videos", port);
        let request = FetchRequest::get(url::Url::parse(&url).unwrap());
        let err = network.fetch(&request).unwrap_err();
        assert!(err.is_network());
    }
}
