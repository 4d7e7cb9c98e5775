//! Process supervisor for the backend server.
//!
//! State machine:
//!
//! ```text
//! NotStarted ──start()──▶ Starting ──marker──▶ Ready
//!                            │  └──stream closed / spawn error──▶ Failed
//!                            └──timeout──▶ (stays Starting) ──late marker──▶ Ready
//! Starting | Ready ──stop()──▶ Stopped
//! Stopped | Failed ──start()──▶ Starting
//! ```
//!
//! `start()` and `stop()` are not reentrant against each other; callers hold
//! the supervisor behind a mutex.

use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::backend::{BackendProcess, BackendState, LineWait};
use crate::config::SupervisorConfig;
use crate::error::{HostError, Result};

const EXIT_CODE_GRACE: Duration = Duration::from_millis(500);

/// How `start()` resolved. None of these is an error: the caller loads the UI
/// in every case and the UI reports connection failures itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
    /// Output closed before the marker appeared; the backend has exited.
    Exited(Option<i32>),
}

pub struct Supervisor {
    config: SupervisorConfig,
    backend: Option<BackendProcess>,
    state: BackendState,
    exit_code: Option<i32>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            backend: None,
            state: BackendState::NotStarted,
            exit_code: None,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Current state. A backend that timed out is reported `Ready` as soon as
    /// its output shows the marker.
    pub fn state(&self) -> BackendState {
        match &self.backend {
            Some(backend) if self.state == BackendState::Starting && backend.marker_seen() => {
                BackendState::Ready
            }
            _ => self.state,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn pid(&self) -> Option<u32> {
        self.backend.as_ref().map(BackendProcess::pid)
    }

    /// Launches the backend and waits for the readiness marker.
    ///
    /// Fails only when the process cannot be spawned at all.
    pub fn start(&mut self) -> Result<Readiness> {
        let current = self.state();
        if current.is_live() {
            return Err(HostError::AlreadyRunning(current));
        }

        self.state = BackendState::Starting;
        self.exit_code = None;

        let started = Instant::now();
        let deadline = started + self.config.readiness_timeout;

        info!(
            command = %self.config.command,
            args = ?self.config.arguments(),
            cwd = %self.config.working_dir.display(),
            timeout_ms = self.config.readiness_timeout.as_millis() as u64,
            "Starting backend"
        );

        let mut backend = match BackendProcess::spawn(&self.config) {
            Ok(backend) => backend,
            Err(err) => {
                error!(error = %err, "Backend could not be spawned");
                self.state = BackendState::Failed;
                return Err(err);
            }
        };

        let readiness = loop {
            match backend.next_line(deadline) {
                LineWait::Line(line) if line.contains(&self.config.readiness_marker) => {
                    break Readiness::Ready;
                }
                LineWait::Line(_) => continue,
                LineWait::TimedOut => break Readiness::TimedOut,
                LineWait::Closed => {
                    break Readiness::Exited(backend.wait_exit_code(EXIT_CODE_GRACE));
                }
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match readiness {
            Readiness::Ready => {
                info!(pid = backend.pid(), elapsed_ms, "Backend ready");
                backend.stop_observing();
                self.state = BackendState::Ready;
                self.backend = Some(backend);
            }
            Readiness::TimedOut => {
                warn!(
                    pid = backend.pid(),
                    elapsed_ms,
                    marker = %self.config.readiness_marker,
                    "Backend did not report readiness in time; continuing"
                );
                backend.stop_observing();
                self.backend = Some(backend);
            }
            Readiness::Exited(code) => {
                error!(code = ?code, elapsed_ms, "Backend exited before reporting readiness");
                if code.is_none() {
                    // Output closed but the process has not been reaped yet.
                    backend.terminate();
                }
                self.exit_code = code;
                self.state = BackendState::Failed;
            }
        }

        Ok(readiness)
    }

    /// Sends a termination signal to a live backend without waiting for it
    /// to exit. Returns `false` (and does nothing) when there is nothing to
    /// stop, so repeated calls never signal twice.
    pub fn stop(&mut self) -> bool {
        let state = self.state();
        let Some(backend) = self.backend.take() else {
            return false;
        };

        info!(pid = backend.pid(), state = ?state, "Stopping backend");
        backend.terminate();
        self.state = BackendState::Stopped;
        true
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}
