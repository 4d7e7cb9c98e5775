//! Application lifecycle actions requested over the bridge.

use std::io;
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info, warn};

use crate::bridge::{Bridge, LifecycleAction};
use crate::supervisor::Supervisor;

/// Process-level operations the host can't perform on itself in tests.
pub trait HostControl: Send + Sync {
    /// Launches a fresh instance of the host with the same arguments.
    fn relaunch(&self) -> io::Result<()>;
    fn exit(&self, code: i32);
}

/// Real implementation: re-executes the current binary and exits the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessControl;

impl HostControl for ProcessControl {
    fn relaunch(&self) -> io::Result<()> {
        let exe = std::env::current_exe()?;
        let child = Command::new(&exe).args(std::env::args_os().skip(1)).spawn()?;
        info!(pid = child.id(), exe = %exe.display(), "Relaunched host");
        Ok(())
    }

    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

pub struct HostContext {
    supervisor: Arc<Mutex<Supervisor>>,
    bridge: Bridge,
    control: Arc<dyn HostControl>,
}

impl HostContext {
    pub fn new(
        supervisor: Arc<Mutex<Supervisor>>,
        bridge: Bridge,
        control: Arc<dyn HostControl>,
    ) -> Self {
        Self {
            supervisor,
            bridge,
            control,
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn supervisor(&self) -> &Arc<Mutex<Supervisor>> {
        &self.supervisor
    }

    /// Stops the backend. Safe to call any number of times.
    pub fn stop_backend(&self) -> bool {
        let mut supervisor = self.supervisor.lock().unwrap_or_else(PoisonError::into_inner);
        supervisor.stop()
    }

    /// Runs a deferred lifecycle action.
    ///
    /// Restart stops the backend before the new instance launches, so the new
    /// backend can bind the same port. If the relaunch fails the current
    /// instance stays up and brings its own backend back.
    pub fn perform(&self, action: LifecycleAction) {
        info!(action = ?action, "Performing lifecycle action");
        self.stop_backend();

        match action {
            LifecycleAction::Quit => self.control.exit(0),
            LifecycleAction::Restart => match self.control.relaunch() {
                Ok(()) => self.control.exit(0),
                Err(err) => {
                    error!(error = %err, "Relaunch failed; keeping current instance");
                    let mut supervisor =
                        self.supervisor.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Err(err) = supervisor.start() {
                        warn!(error = %err, "Backend restart after failed relaunch failed");
                    }
                }
            },
        }
    }
}
