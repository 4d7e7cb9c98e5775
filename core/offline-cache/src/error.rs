//! Error types for the offline cache.

/// Errors produced by the cache engine and store registry.
///
/// Only [`CacheError::Network`] ever reaches the UI, and only when no cached
/// fallback exists. Store failures are logged and swallowed by the engine.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    // ─────────────────────────────────────────────────────────────────────
    // Network
    // ─────────────────────────────────────────────────────────────────────
    #[error("Network request failed: {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP client could not be built: {0}")]
    Client(String),

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid manifest URL `{url}`: {details}")]
    InvalidManifestUrl { url: String, details: String },

    #[error("Manifest entry {url} returned status {status}")]
    ManifestEntry { url: String, status: u16 },

    #[error("Cannot activate before install has completed")]
    NotInstalled,

    // ─────────────────────────────────────────────────────────────────────
    // Storage
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid store name: {0:?}")]
    InvalidStoreName(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CacheError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, CacheError::Network { .. })
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
