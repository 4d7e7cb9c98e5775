#![cfg(unix)]

use deskshell_bridge_protocol::{Channel, Request, Response, ERROR_INVALID_REQUEST};
use serde_json::json;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const READY_SCRIPT: &str = r#"echo "INFO:     Uvicorn running on http://0.0.0.0:$2"
exec sleep 60
"#;

struct HostGuard {
    child: Child,
}

impl Drop for HostGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

struct Ports {
    proxy: u16,
}

fn prepare_data_dir(data_dir: &Path) -> Ports {
    let ports = (free_port(), free_port());
    fs_err::create_dir_all(data_dir).unwrap();
    fs_err::write(
        data_dir.join("preferences.json"),
        json!({ "serverPort": ports.0, "proxyPort": ports.1 }).to_string(),
    )
    .unwrap();
    fs_err::write(data_dir.join("web_server.sh"), READY_SCRIPT).unwrap();
    Ports { proxy: ports.1 }
}

fn spawn_host(data_dir: &Path) -> HostGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_deskshell-host"))
        .arg("--data-dir")
        .arg(data_dir)
        .arg("run")
        .arg("--dev")
        .arg("--no-window")
        .arg("--python")
        .arg("sh")
        .arg("--script")
        .arg(data_dir.join("web_server.sh"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn deskshell-host");
    HostGuard { child }
}

fn socket_path(data_dir: &Path) -> PathBuf {
    data_dir.join("bridge.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() && UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for bridge socket at {}", path.display());
}

fn send_raw(socket: &Path, payload: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to bridge socket");
    stream.write_all(payload).expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn send_request(socket: &Path, request: &Request) -> Response {
    let mut payload = serde_json::to_vec(request).expect("Failed to serialize request");
    payload.push(b'\n');
    send_raw(socket, &payload)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };
    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn http_status(port: u16, path: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut stream = loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => break stream,
            Err(err) if Instant::now() >= deadline => panic!("Failed to connect to proxy: {}", err),
            Err(_) => sleep(Duration::from_millis(25)),
        }
    };
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    write!(
        stream,
        "GET {} HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n",
        path
    )
    .unwrap();
    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);
    response.lines().next().unwrap_or_default().to_string()
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        sleep(Duration::from_millis(25));
    }
    None
}

#[test]
fn bridge_answers_and_quits_cleanly() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("data");
    let ports = prepare_data_dir(&data_dir);
    let mut host = spawn_host(&data_dir);
    let socket = socket_path(&data_dir);
    wait_for_socket(&socket, Duration::from_secs(10));

    let mut info = Request::new(Channel::GetAppInfo, None);
    info.id = Some("info-1".to_string());
    let response = send_request(&socket, &info);
    assert!(response.ok, "getInfo failed: {:?}", response.error);
    assert_eq!(response.id.as_deref(), Some("info-1"));
    let data = response.data.unwrap();
    assert_eq!(data["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(data["isDevelopmentMode"], true);

    let malformed = Request::new(
        Channel::OpenFileDialog,
        Some(json!({ "properties": "openFile" })),
    );
    let response = send_request(&socket, &malformed);
    assert!(!response.ok);
    assert_eq!(response.error.unwrap().code, ERROR_INVALID_REQUEST);

    let response = send_raw(
        &socket,
        br#"{"protocol_version":1,"channel":"fs:readFile","payload":{"path":"/etc/passwd"}}
"#,
    );
    assert!(!response.ok);
    assert_eq!(response.error.unwrap().code, ERROR_INVALID_REQUEST);

    // The backend never answers HTTP, so nothing can be served.
    assert!(http_status(ports.proxy, "/api/videos").contains("502"));

    let response = send_request(&socket, &Request::new(Channel::QuitApplication, None));
    assert!(response.ok);
    assert_eq!(response.data, Some(json!({ "accepted": true })));

    let status = wait_for_exit(&mut host.child, Duration::from_secs(10))
        .expect("host did not exit after app:quit");
    assert!(status.success());
}

#[test]
fn purge_cache_deletes_every_store() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("data");
    for store in ["deskshell-static-v1", "deskshell-runtime-v1", "deskshell-static-v0"] {
        fs_err::create_dir_all(data_dir.join("caches").join(store)).unwrap();
    }

    let output = Command::new(env!("CARGO_BIN_EXE_deskshell-host"))
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("purge-cache")
        .stderr(Stdio::null())
        .output()
        .expect("Failed to run purge-cache");

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "Deleted 3 cache store(s)"
    );
    let remaining = std::fs::read_dir(data_dir.join("caches")).unwrap().count();
    assert_eq!(remaining, 0);
}
