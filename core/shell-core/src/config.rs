//! Configuration loading for the host.
//!
//! Settings are layered: built-in defaults, then the optional `host.toml`,
//! then the persisted preferences, then command-line flags (applied by the
//! host binary). The resulting [`SupervisorConfig`] is immutable once the
//! supervisor owns it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fs_err as fs;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{HostError, Result};

pub const DEFAULT_SERVER_PORT: u16 = 8000;
pub const SERVER_PORT_KEY: &str = "serverPort";
pub const PROXY_PORT_KEY: &str = "proxyPort";
pub const DEFAULT_READINESS_MARKER: &str = "Uvicorn running";
pub const DEFAULT_READINESS_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_BACKEND_BIND_HOST: &str = "0.0.0.0";

const BACKEND_SCRIPT: &str = "web_server.py";
const PACKAGED_BACKEND_DIR: &str = "python-backend";

/// Interpreter used to run the backend script on this platform.
pub fn default_python_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "python"
    } else {
        "python3"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Launch layout
// ─────────────────────────────────────────────────────────────────────────────

/// Where the backend lives on disk. Development runs from the repository
/// root; packaged builds run from the bundled resources directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchLayout {
    Development { repo_root: PathBuf },
    Packaged { resources_dir: PathBuf },
}

impl LaunchLayout {
    pub fn development(repo_root: impl Into<PathBuf>) -> Self {
        LaunchLayout::Development {
            repo_root: repo_root.into(),
        }
    }

    pub fn packaged(resources_dir: impl Into<PathBuf>) -> Self {
        LaunchLayout::Packaged {
            resources_dir: resources_dir.into(),
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, LaunchLayout::Development { .. })
    }

    pub fn working_dir(&self) -> &Path {
        match self {
            LaunchLayout::Development { repo_root } => repo_root,
            LaunchLayout::Packaged { resources_dir } => resources_dir,
        }
    }

    pub fn script_path(&self) -> PathBuf {
        match self {
            LaunchLayout::Development { repo_root } => repo_root.join(BACKEND_SCRIPT),
            LaunchLayout::Packaged { resources_dir } => {
                resources_dir.join(PACKAGED_BACKEND_DIR).join(BACKEND_SCRIPT)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor config
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Address the backend binds to (passed as `--host`).
    pub host: String,
    pub port: u16,
    pub development_mode: bool,
    pub command: String,
    pub script_path: PathBuf,
    pub working_dir: PathBuf,
    pub readiness_timeout: Duration,
    /// Substring that marks the backend as accepting connections.
    pub readiness_marker: String,
    /// Also look for the marker on stderr (some servers log their banner there).
    pub watch_stderr: bool,
}

impl SupervisorConfig {
    pub fn for_layout(layout: &LaunchLayout, port: u16) -> Self {
        Self {
            host: DEFAULT_BACKEND_BIND_HOST.to_string(),
            port,
            development_mode: layout.is_development(),
            command: default_python_command().to_string(),
            script_path: layout.script_path(),
            working_dir: layout.working_dir().to_path_buf(),
            readiness_timeout: Duration::from_millis(DEFAULT_READINESS_TIMEOUT_MS),
            readiness_marker: DEFAULT_READINESS_MARKER.to_string(),
            watch_stderr: false,
        }
    }

    /// Applies `[backend]` overrides from `host.toml`.
    pub fn with_settings(mut self, settings: &BackendSettings) -> Self {
        if let Some(python) = &settings.python {
            self.command = python.clone();
        }
        if let Some(script) = &settings.script {
            self.script_path = if script.is_absolute() {
                script.clone()
            } else {
                self.working_dir.join(script)
            };
        }
        if let Some(host) = &settings.host {
            self.host = host.clone();
        }
        if let Some(marker) = &settings.readiness_marker {
            if !marker.is_empty() {
                self.readiness_marker = marker.clone();
            }
        }
        if let Some(timeout_ms) = settings.readiness_timeout_ms {
            self.readiness_timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(watch_stderr) = settings.watch_stderr {
            self.watch_stderr = watch_stderr;
        }
        self
    }

    /// Arguments passed to the interpreter: `[script, --port, port, --host, host]`.
    pub fn arguments(&self) -> Vec<String> {
        vec![
            self.script_path.to_string_lossy().to_string(),
            "--port".to_string(),
            self.port.to_string(),
            "--host".to_string(),
            self.host.clone(),
        ]
    }

    /// Loopback URL the host uses to reach the backend.
    pub fn backend_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// host.toml
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostSettings {
    pub backend: BackendSettings,
    pub cache: CacheSettings,
    pub window: WindowSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSettings {
    pub python: Option<String>,
    pub script: Option<PathBuf>,
    pub host: Option<String>,
    pub readiness_marker: Option<String>,
    pub readiness_timeout_ms: Option<u64>,
    pub watch_stderr: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub store_prefix: Option<String>,
    pub generation: Option<String>,
    pub manifest: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowSettings {
    /// Command (and leading arguments) that opens the UI; the URL is appended.
    pub launcher: Option<Vec<String>>,
}

/// Loads `host.toml`, returning defaults if the file doesn't exist.
pub fn load_host_settings(path: &Path) -> Result<HostSettings> {
    if !path.exists() {
        return Ok(HostSettings::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|err| HostError::io(format!("read {}", path.display()), err))?;
    toml::from_str(&content).map_err(|err| HostError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Preferences
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque key-value preferences persisted by the desktop shell.
///
/// Read once at startup. Missing or corrupt files yield an empty store so the
/// host always falls back to defaults.
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    values: Map<String, Value>,
}

impl Preferences {
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!(error = %err, path = %path.display(), "Failed to read preferences");
                return Self::default();
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(values)) => Self { values },
            Ok(_) => {
                warn!(path = %path.display(), "Preferences file is not a JSON object; ignoring");
                Self::default()
            }
            Err(err) => {
                warn!(error = %err, path = %path.display(), "Failed to parse preferences");
                Self::default()
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn server_port(&self) -> u16 {
        self.get(SERVER_PORT_KEY)
            .and_then(port_value)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    /// Port of the intercepting front; defaults to the one after `serverPort`.
    pub fn proxy_port(&self) -> u16 {
        let server_port = self.server_port();
        self.get(PROXY_PORT_KEY)
            .and_then(port_value)
            .unwrap_or_else(|| server_port.checked_add(1).unwrap_or(server_port - 1))
    }
}

fn port_value(value: &Value) -> Option<u16> {
    let raw = match value {
        Value::Number(number) => number.as_u64()?,
        Value::String(text) => text.trim().parse().ok()?,
        _ => return None,
    };
    u16::try_from(raw).ok().filter(|port| *port != 0)
}
