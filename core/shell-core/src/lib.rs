//! # deskshell-core
//!
//! Core library for the deskshell desktop host: it owns the backend server
//! process and answers the privileged bridge on behalf of the sandboxed UI.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Output streams are read on
//!   dedicated threads and consumed through channels with explicit deadlines.
//! - **No ambient singletons**: [`HostContext`] owns the supervisor, the bridge
//!   and the lifecycle controls; callers share it behind an `Arc`.
//! - **Closed surface**: the UI reaches the host only through the channels in
//!   [`deskshell_bridge_protocol::Channel`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deskshell_core::{LaunchLayout, Supervisor, SupervisorConfig};
//!
//! let config = SupervisorConfig::for_layout(&LaunchLayout::development(repo_root), 8000);
//! let mut supervisor = Supervisor::new(config);
//! let readiness = supervisor.start()?;
//! ```

pub mod backend;
pub mod bridge;
pub mod config;
pub mod dialogs;
pub mod error;
pub mod host;
pub mod storage;
pub mod supervisor;
pub mod window;

pub use backend::{BackendProcess, BackendState, LineWait};
pub use bridge::{current_platform, Bridge, BridgeOutcome, LifecycleAction};
pub use config::{
    default_python_command, load_host_settings, BackendSettings, CacheSettings, HostSettings,
    LaunchLayout, Preferences, SupervisorConfig, WindowSettings,
};
pub use dialogs::{CommandDialogs, DialogHost};
pub use error::{HostError, Result};
pub use host::{HostContext, HostControl, ProcessControl};
pub use storage::StorageConfig;
pub use supervisor::{Readiness, Supervisor};
pub use window::WindowLauncher;
