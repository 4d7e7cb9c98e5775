#![cfg(unix)]

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use deskshell_bridge_protocol::AppInfo;
use deskshell_core::{
    BackendState, Bridge, CommandDialogs, HostContext, HostControl, HostError, LaunchLayout,
    LifecycleAction, Readiness, Supervisor, SupervisorConfig,
};
use tempfile::TempDir;

const READY_SCRIPT: &str = r#"echo "booting on port $2"
echo "INFO:     Uvicorn running on http://0.0.0.0:$2 (Press CTRL+C to quit)"
exec sleep 30
"#;

fn config_for(dir: &Path, script: &str, timeout: Duration) -> SupervisorConfig {
    let script_path = dir.join("web_server.sh");
    fs_err::write(&script_path, script).unwrap();

    let mut config = SupervisorConfig::for_layout(&LaunchLayout::development(dir), 18_000);
    config.command = "sh".to_string();
    config.script_path = script_path;
    config.readiness_timeout = timeout;
    config
}

#[test]
fn marker_on_stdout_marks_ready() {
    let temp = TempDir::new().unwrap();
    let mut supervisor = Supervisor::new(config_for(temp.path(), READY_SCRIPT, Duration::from_secs(5)));

    assert_eq!(supervisor.start().unwrap(), Readiness::Ready);
    assert_eq!(supervisor.state(), BackendState::Ready);
    assert!(supervisor.pid().is_some());
    assert!(supervisor.stop());
}

#[test]
fn marker_on_stderr_requires_opt_in() {
    let temp = TempDir::new().unwrap();
    let script = "echo 'INFO: Uvicorn running on http://0.0.0.0:8000' >&2\nexec sleep 30\n";

    let mut ignored = Supervisor::new(config_for(temp.path(), script, Duration::from_millis(300)));
    assert_eq!(ignored.start().unwrap(), Readiness::TimedOut);
    ignored.stop();

    let mut config = config_for(temp.path(), script, Duration::from_secs(5));
    config.watch_stderr = true;
    let mut watched = Supervisor::new(config);
    assert_eq!(watched.start().unwrap(), Readiness::Ready);
}

#[test]
fn silent_backend_times_out_and_keeps_running() {
    let temp = TempDir::new().unwrap();
    let timeout = Duration::from_millis(300);
    let mut supervisor = Supervisor::new(config_for(temp.path(), "exec sleep 30\n", timeout));

    let started = Instant::now();
    assert_eq!(supervisor.start().unwrap(), Readiness::TimedOut);
    assert!(started.elapsed() >= timeout);
    assert_eq!(supervisor.state(), BackendState::Starting);
    assert!(supervisor.pid().is_some());
    assert!(supervisor.stop());
}

#[test]
fn invalid_utf8_output_does_not_stop_readiness_detection() {
    let temp = TempDir::new().unwrap();
    let script = r#"printf 'caf\351 loaded\n'
echo "INFO:     Uvicorn running on http://0.0.0.0:$2"
exec sleep 30
"#;
    let mut supervisor = Supervisor::new(config_for(temp.path(), script, Duration::from_secs(5)));

    assert_eq!(supervisor.start().unwrap(), Readiness::Ready);
    assert_eq!(supervisor.state(), BackendState::Ready);
    assert!(supervisor.pid().is_some());
    assert!(supervisor.stop());
}

#[test]
fn marker_after_timeout_marks_ready() {
    let temp = TempDir::new().unwrap();
    let script = r#"sleep 1
echo "INFO:     Uvicorn running on http://0.0.0.0:$2"
exec sleep 30
"#;
    let mut supervisor = Supervisor::new(config_for(temp.path(), script, Duration::from_millis(200)));

    assert_eq!(supervisor.start().unwrap(), Readiness::TimedOut);
    assert_eq!(supervisor.state(), BackendState::Starting);

    let deadline = Instant::now() + Duration::from_secs(10);
    while supervisor.state() != BackendState::Ready && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(25));
    }
    assert_eq!(supervisor.state(), BackendState::Ready);
    assert!(matches!(
        supervisor.start(),
        Err(HostError::AlreadyRunning(BackendState::Ready))
    ));
    assert!(supervisor.stop());
    assert_eq!(supervisor.state(), BackendState::Stopped);
}

#[test]
fn early_exit_marks_failed_with_exit_code() {
    let temp = TempDir::new().unwrap();
    let mut supervisor = Supervisor::new(config_for(
        temp.path(),
        "echo 'ModuleNotFoundError: fastapi' >&2\nexit 3\n",
        Duration::from_secs(5),
    ));

    assert_eq!(supervisor.start().unwrap(), Readiness::Exited(Some(3)));
    assert_eq!(supervisor.state(), BackendState::Failed);
    assert_eq!(supervisor.exit_code(), Some(3));
    assert!(!supervisor.stop());
}

#[test]
fn stop_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let mut supervisor = Supervisor::new(config_for(temp.path(), READY_SCRIPT, Duration::from_secs(5)));
    supervisor.start().unwrap();

    assert!(supervisor.stop());
    assert!(!supervisor.stop());
    assert_eq!(supervisor.state(), BackendState::Stopped);
}

#[test]
fn start_while_live_is_rejected_and_restart_after_stop_works() {
    let temp = TempDir::new().unwrap();
    let mut supervisor = Supervisor::new(config_for(temp.path(), READY_SCRIPT, Duration::from_secs(5)));
    supervisor.start().unwrap();
    let first_pid = supervisor.pid();

    assert!(matches!(
        supervisor.start(),
        Err(HostError::AlreadyRunning(BackendState::Ready))
    ));

    supervisor.stop();
    assert_eq!(supervisor.start().unwrap(), Readiness::Ready);
    assert_ne!(supervisor.pid(), first_pid);
    supervisor.stop();
}

/// Records what the supervisor looked like when the host was relaunched.
struct RecordingControl {
    supervisor: Arc<Mutex<Supervisor>>,
    relaunch_fails: bool,
    events: Mutex<Vec<String>>,
}

impl RecordingControl {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl HostControl for RecordingControl {
    fn relaunch(&self) -> io::Result<()> {
        let state = self.supervisor.lock().unwrap().state();
        self.events
            .lock()
            .unwrap()
            .push(format!("relaunch while {:?}", state));
        if self.relaunch_fails {
            return Err(io::Error::new(io::ErrorKind::NotFound, "exe missing"));
        }
        Ok(())
    }

    fn exit(&self, code: i32) {
        self.events.lock().unwrap().push(format!("exit {}", code));
    }
}

fn host_with_ready_backend(temp: &TempDir, relaunch_fails: bool) -> (HostContext, Arc<RecordingControl>) {
    let supervisor = Arc::new(Mutex::new(Supervisor::new(config_for(
        temp.path(),
        READY_SCRIPT,
        Duration::from_secs(5),
    ))));
    supervisor.lock().unwrap().start().unwrap();

    let control = Arc::new(RecordingControl {
        supervisor: Arc::clone(&supervisor),
        relaunch_fails,
        events: Mutex::new(Vec::new()),
    });
    let bridge = Bridge::new(
        AppInfo {
            version: "0.1.0".to_string(),
            platform: "linux".to_string(),
            is_development_mode: true,
        },
        Arc::new(CommandDialogs),
    );
    let host = HostContext::new(supervisor, bridge, control.clone());
    (host, control)
}

#[test]
fn restart_stops_backend_before_relaunching() {
    let temp = TempDir::new().unwrap();
    let (host, control) = host_with_ready_backend(&temp, false);

    host.perform(LifecycleAction::Restart);

    assert_eq!(control.events(), vec!["relaunch while Stopped", "exit 0"]);
}

#[test]
fn failed_relaunch_keeps_instance_and_restarts_backend() {
    let temp = TempDir::new().unwrap();
    let (host, control) = host_with_ready_backend(&temp, true);

    host.perform(LifecycleAction::Restart);

    assert_eq!(control.events(), vec!["relaunch while Stopped"]);
    assert_eq!(host.supervisor().lock().unwrap().state(), BackendState::Ready);
    assert!(host.stop_backend());
}

#[test]
fn quit_stops_backend_and_exits() {
    let temp = TempDir::new().unwrap();
    let (host, control) = host_with_ready_backend(&temp, false);

    host.perform(LifecycleAction::Quit);

    assert_eq!(control.events(), vec!["exit 0"]);
    assert_eq!(host.supervisor().lock().unwrap().state(), BackendState::Stopped);
}
