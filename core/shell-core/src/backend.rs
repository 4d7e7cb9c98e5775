//! Backend process handle.
//!
//! Wraps the spawned backend server. Output is read on dedicated threads:
//! every stdout line is logged under the `backend` target and, while someone
//! is still waiting for readiness, forwarded through a channel. Every stderr
//! line is logged at warn level; nothing the backend prints is swallowed.
//! Lines are decoded lossily so stray non-UTF-8 bytes never stop a reader.
//!
//! Observed streams also latch a "marker seen" flag, so a readiness marker
//! printed after the caller stopped waiting is still noticed.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::{HostError, Result};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    NotStarted,
    Starting,
    Ready,
    Stopped,
    Failed,
}

impl BackendState {
    /// A process handle exists and has not been torn down.
    pub fn is_live(self) -> bool {
        matches!(self, BackendState::Starting | BackendState::Ready)
    }
}

/// Result of waiting for the next observed output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineWait {
    Line(String),
    /// Every observed stream reached end-of-file.
    Closed,
    TimedOut,
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Forwarding side of an observed output stream.
struct Observer {
    lines: Option<Sender<String>>,
    marker: Arc<str>,
    marker_seen: Arc<AtomicBool>,
}

impl Observer {
    fn observe(&mut self, line: String) {
        if line.contains(&*self.marker) && !self.marker_seen.swap(true, Ordering::SeqCst) {
            debug!(target: "backend", "Readiness marker observed");
        }
        let delivered = self.lines.as_ref().map(|tx| tx.send(line).is_ok());
        if delivered == Some(false) {
            self.lines = None;
        }
    }
}

pub struct BackendProcess {
    child: Child,
    lines: Option<Receiver<String>>,
    marker_seen: Arc<AtomicBool>,
}

impl BackendProcess {
    /// Spawns `command [script, --port, port, --host, host]` in the configured
    /// working directory.
    pub fn spawn(config: &SupervisorConfig) -> Result<Self> {
        let mut child = Command::new(&config.command)
            .args(config.arguments())
            .current_dir(&config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| HostError::Spawn {
                command: config.command.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::channel();
        let marker: Arc<str> = Arc::from(config.readiness_marker.as_str());
        let marker_seen = Arc::new(AtomicBool::new(false));
        let observer = || Observer {
            lines: Some(tx.clone()),
            marker: Arc::clone(&marker),
            marker_seen: Arc::clone(&marker_seen),
        };

        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, Stream::Stdout, Some(observer()));
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, Stream::Stderr, config.watch_stderr.then(observer));
        }
        drop(tx);

        Ok(Self {
            child,
            lines: Some(rx),
            marker_seen,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Waits for the next observed line, giving up at `deadline`.
    pub fn next_line(&self, deadline: Instant) -> LineWait {
        let Some(lines) = &self.lines else {
            return LineWait::Closed;
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return match lines.try_recv() {
                Ok(line) => LineWait::Line(line),
                Err(mpsc::TryRecvError::Empty) => LineWait::TimedOut,
                Err(mpsc::TryRecvError::Disconnected) => LineWait::Closed,
            };
        }

        match lines.recv_timeout(remaining) {
            Ok(line) => LineWait::Line(line),
            Err(RecvTimeoutError::Timeout) => LineWait::TimedOut,
            Err(RecvTimeoutError::Disconnected) => LineWait::Closed,
        }
    }

    /// Whether an observed stream has printed the readiness marker, including
    /// after `stop_observing`.
    pub fn marker_seen(&self) -> bool {
        self.marker_seen.load(Ordering::SeqCst)
    }

    /// Stops forwarding lines; the reader threads keep logging them.
    pub fn stop_observing(&mut self) {
        self.lines = None;
    }

    /// Reaps the exit code, polling for at most `grace`.
    pub fn wait_exit_code(&mut self, grace: Duration) -> Option<i32> {
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return status.code(),
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
                Ok(None) => return None,
                Err(err) => {
                    warn!(error = %err, pid = self.pid(), "Failed to query backend exit status");
                    return None;
                }
            }
        }
    }

    /// Sends a termination signal and returns without waiting for the exit.
    ///
    /// The child is reaped on a background thread so it never lingers as a
    /// zombie.
    pub fn terminate(mut self) {
        let pid = self.pid();
        if let Err(err) = send_termination_signal(&mut self.child) {
            warn!(error = %err, pid, "Failed to signal backend");
        }

        let mut child = self.child;
        thread::spawn(move || match child.wait() {
            Ok(status) => info!(pid, code = ?status.code(), "Backend exited"),
            Err(err) => warn!(error = %err, pid, "Failed to reap backend"),
        });
    }
}

#[cfg(unix)]
fn send_termination_signal(child: &mut Child) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(child.id())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_termination_signal(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

fn spawn_reader<R>(stream: R, kind: Stream, mut observer: Option<Observer>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(target: "backend", error = %err, "Failed to read backend output");
                    break;
                }
            }

            let line = decode_line(&buf);
            match kind {
                Stream::Stdout => info!(target: "backend", stream = "stdout", "{}", line),
                Stream::Stderr => warn!(target: "backend", stream = "stderr", "{}", line),
            }
            if let Some(observer) = observer.as_mut() {
                observer.observe(line);
            }
        }
        debug!(target: "backend", "Backend output stream closed");
    });
}

fn decode_line(raw: &[u8]) -> String {
    let trimmed = raw.strip_suffix(b"\n").unwrap_or(raw);
    let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
    String::from_utf8_lossy(trimmed).into_owned()
}
