//! Opens the UI window.
//!
//! A configured launcher (for example a webview wrapper) is spawned with the
//! URL appended and the bridge socket exported in its environment; the host
//! quits when that process exits. Without a launcher the URL is handed to the
//! OS opener and the host keeps running until asked to quit.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use deskshell_bridge_protocol::BRIDGE_SOCKET_ENV;
use tracing::info;

use crate::error::{HostError, Result};

#[derive(Debug, Clone)]
pub struct WindowLauncher {
    launcher: Option<Vec<String>>,
    bridge_socket: PathBuf,
}

impl WindowLauncher {
    pub fn new(launcher: Option<Vec<String>>, bridge_socket: PathBuf) -> Self {
        let launcher = launcher.filter(|command| !command.is_empty());
        Self {
            launcher,
            bridge_socket,
        }
    }

    /// Whether the window is a child process whose exit ends the app.
    pub fn owns_window(&self) -> bool {
        self.launcher.is_some()
    }

    /// Opens `url`. Returns the window process when it is owned by the host.
    pub fn open(&self, url: &str) -> Result<Option<Child>> {
        let (program, args) = match &self.launcher {
            Some(command) => (command[0].clone(), launcher_args(command, url)),
            None => system_opener(url)?,
        };

        info!(program = %program, url, "Opening window");
        let mut command = Command::new(&program);
        command
            .args(&args)
            .env(BRIDGE_SOCKET_ENV, &self.bridge_socket)
            .stdin(Stdio::null());

        let child = command.spawn().map_err(|source| HostError::Spawn {
            command: program.clone(),
            source,
        })?;

        if self.owns_window() {
            Ok(Some(child))
        } else {
            // Openers hand off to another process and exit at once.
            std::thread::spawn(move || {
                let mut child = child;
                let _ = child.wait();
            });
            Ok(None)
        }
    }
}

fn launcher_args(command: &[String], url: &str) -> Vec<String> {
    let mut args: Vec<String> = command[1..].to_vec();
    args.push(url.to_string());
    args
}

fn system_opener(url: &str) -> Result<(String, Vec<String>)> {
    if cfg!(target_os = "macos") {
        Ok(("open".to_string(), vec![url.to_string()]))
    } else if cfg!(target_os = "windows") {
        Ok((
            "cmd".to_string(),
            vec!["/C".to_string(), "start".to_string(), String::new(), url.to_string()],
        ))
    } else if cfg!(unix) {
        Ok(("xdg-open".to_string(), vec![url.to_string()]))
    } else {
        Err(HostError::UnsupportedPlatform("system URL opener".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_launcher_falls_back_to_system_opener() {
        let launcher = WindowLauncher::new(Some(Vec::new()), PathBuf::from("/tmp/bridge.sock"));
        assert!(!launcher.owns_window());
    }

    #[test]
    fn launcher_appends_url() {
        let command = vec!["webview".to_string(), "--title".to_string(), "Dash".to_string()];
        assert_eq!(
            launcher_args(&command, "http://127.0.0.1:8001"),
            vec!["--title", "Dash", "http://127.0.0.1:8001"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn owned_window_exports_bridge_socket() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = temp.path().join("env.txt");
        let script = format!("printf '%s %s' \"$DESKSHELL_BRIDGE_SOCKET\" \"$1\" > {}", out.display());
        let launcher = WindowLauncher::new(
            Some(vec!["sh".to_string(), "-c".to_string(), script, "sh".to_string()]),
            PathBuf::from("/tmp/bridge.sock"),
        );

        let mut child = launcher.open("http://127.0.0.1:8001").unwrap().unwrap();
        assert!(child.wait().unwrap().success());
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "/tmp/bridge.sock http://127.0.0.1:8001"
        );
    }
}
