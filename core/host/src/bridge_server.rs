//! Unix socket transport for the privileged bridge.
//!
//! One newline-terminated JSON request per connection, one JSON response
//! back. Each connection gets its own thread so a blocking native dialog
//! only stalls the caller that opened it.

use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use deskshell_bridge_protocol::{ErrorInfo, Request, Response, MAX_REQUEST_BYTES};
use deskshell_core::{BridgeOutcome, HostContext};
use fs_err as fs;
use serde_json::Value;
use tracing::{debug, info, warn};

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

/// Binds the bridge socket, replacing a stale one, readable by the owner only.
pub fn bind(socket_path: &Path) -> io::Result<UnixListener> {
    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if socket_path.exists() {
        fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    info!(path = %socket_path.display(), "Bridge listening");
    Ok(listener)
}

pub fn spawn(listener: UnixListener, host: Arc<HostContext>) -> io::Result<()> {
    thread::Builder::new()
        .name("bridge".to_string())
        .spawn(move || serve(listener, host))?;
    Ok(())
}

fn serve(listener: UnixListener, host: Arc<HostContext>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let host = Arc::clone(&host);
                thread::spawn(move || handle_connection(stream, host));
            }
            Err(err) => warn!(error = %err, "Failed to accept bridge connection"),
        }
    }
}

fn handle_connection(mut stream: UnixStream, host: Arc<HostContext>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read bridge request");
            let _ = write_response(&mut stream, &Response::error_with_info(None, err));
            return;
        }
    };

    match host.bridge().dispatch(request) {
        BridgeOutcome::Reply(response) => {
            let _ = write_response(&mut stream, &response);
        }
        BridgeOutcome::Deferred { ack, action } => {
            if let Err(err) = write_response(&mut stream, &ack) {
                debug!(error = %err, "Bridge client went away before the ack");
            }
            drop(stream);
            host.perform(action);
        }
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };
    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let value: Value = serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })?;
    // Well-formed JSON that doesn't fit the envelope (unknown channel, extra
    // fields) is an invalid request.
    serde_json::from_value(value).map_err(|err| ErrorInfo::invalid_request(err.to_string()))
}

fn write_response(stream: &mut UnixStream, response: &Response) -> io::Result<()> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    stream.write_all(&payload)?;
    stream.flush()
}
