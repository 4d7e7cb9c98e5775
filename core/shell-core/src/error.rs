//! Error types for deskshell-core operations.

use std::path::PathBuf;

use crate::backend::BackendState;

/// All errors that can occur in deskshell-core operations.
///
/// Caching failures never appear here: they are logged and swallowed by the
/// offline cache. Everything in this enum concerns backend availability or the
/// host itself and is surfaced to the user.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Backend Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to start backend `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend is already running (state: {0:?})")]
    AlreadyRunning(BackendState),

    // ─────────────────────────────────────────────────────────────────────
    // Platform Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Command execution failed: {command}: {details}")]
    CommandFailed { command: String, details: String },

    #[error("Platform not supported for this operation: {0}")]
    UnsupportedPlatform(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl HostError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HostError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using HostError.
pub type Result<T> = std::result::Result<T, HostError>;
