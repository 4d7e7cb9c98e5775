//! # offline_cache
//!
//! Client-side caching intermediary for the deskshell dashboard. Every UI
//! request is classified and answered by one of three strategies:
//!
//! | Class | Strategy | Store |
//! |-------|----------|-------|
//! | api (`/api/...`) | network-first, cached fallback | runtime |
//! | streaming media (`.../stream...`) | network only | none |
//! | static asset (everything else) | cache-first | static |
//!
//! Stores are named `<prefix>-static-<generation>` and
//! `<prefix>-runtime-<generation>`; activating a new generation deletes the
//! others.
//!
//! The engine is synchronous. Async callers should run [`CacheEngine::handle`]
//! on a blocking worker.

pub mod engine;
pub mod error;
pub mod network;
pub mod request;
pub mod store;

pub use engine::{
    CacheConfig, CacheEngine, EngineMessage, EngineState, InstallBackoff, DEFAULT_GENERATION,
    DEFAULT_MANIFEST, DEFAULT_STORE_PREFIX,
};
pub use error::{CacheError, Result};
pub use network::{is_hop_by_hop, HttpNetwork, Network};
pub use request::{FetchRequest, FetchResponse, RequestClass, RequestIdentity};
pub use store::{CacheEntry, CacheStore, StoreRegistry};
