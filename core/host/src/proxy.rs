//! Intercepting front: the loopback HTTP listener the window navigates to.
//!
//! Every request is handed to the cache engine on a blocking worker; the
//! engine decides whether the backend, the stores, or both answer it.

use std::io;
use std::net::SocketAddr;
use std::sync::{mpsc, Arc};
use std::thread;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use offline_cache::{is_hop_by_hop, CacheEngine, EngineMessage, FetchRequest, FetchResponse};
use serde_json::json;
use tracing::{error, info, warn};
use url::Url;

pub const MESSAGE_PATH: &str = "/__deskshell/cache/message";
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Starts the front on `127.0.0.1:port` and returns once it is bound.
pub fn spawn(engine: Arc<CacheEngine>, port: u16) -> io::Result<SocketAddr> {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("cache-proxy".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = tx.send(Err(err));
                    return;
                }
            };

            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
                    Ok(listener) => listener,
                    Err(err) => {
                        let _ = tx.send(Err(err));
                        return;
                    }
                };
                let _ = tx.send(listener.local_addr());

                if let Err(err) = axum::serve(listener, router(engine)).await {
                    error!(error = %err, "Cache proxy stopped");
                }
            });
        })?;

    let addr = rx
        .recv()
        .map_err(|_| io::Error::other("cache proxy thread exited before binding"))??;
    info!(addr = %addr, "Cache proxy listening");
    Ok(addr)
}

pub fn router(engine: Arc<CacheEngine>) -> Router {
    Router::new()
        .route(MESSAGE_PATH, post(post_message))
        .fallback(forward)
        .with_state(engine)
}

async fn post_message(
    State(engine): State<Arc<CacheEngine>>,
    Json(message): Json<EngineMessage>,
) -> Response {
    match tokio::task::spawn_blocking(move || engine.handle_message(message)).await {
        Ok(Ok(())) => Json(json!({ "ok": true })).into_response(),
        Ok(Err(err)) => {
            warn!(error = %err, message = ?message, "Cache message failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": err.to_string() })),
            )
                .into_response()
        }
        Err(err) => internal_error(err),
    }
}

async fn forward(State(engine): State<Arc<CacheEngine>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => return (StatusCode::PAYLOAD_TOO_LARGE, err.to_string()).into_response(),
    };

    let url = target_url(
        &engine.config().origin,
        parts.uri.path(),
        parts.uri.query(),
    );
    let mut fetch = FetchRequest::new(parts.method.as_str(), url);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            fetch.headers.push((name.as_str().to_string(), value.to_string()));
        }
    }
    fetch.body = body.to_vec();

    match tokio::task::spawn_blocking(move || engine.handle(&fetch)).await {
        Ok(Ok(response)) => into_http(response),
        Ok(Err(err)) => {
            warn!(error = %err, "Request failed with nothing cached");
            (StatusCode::BAD_GATEWAY, err.to_string()).into_response()
        }
        Err(err) => internal_error(err),
    }
}

/// Maps a request path onto the backend origin. Never changes the host,
/// even for paths like `//other.example/x`.
fn target_url(origin: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = origin.clone();
    url.set_path(path);
    url.set_query(query);
    url
}

fn into_http(response: FetchResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        if !is_hop_by_hop(name) {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|err| internal_error(err))
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    error!(error = %err, "Cache proxy internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_url_keeps_origin_host() {
        let origin = Url::parse("http://127.0.0.1:8000").unwrap();
        assert_eq!(
            target_url(&origin, "/api/videos", Some("page=2")).as_str(),
            "http://127.0.0.1:8000/api/videos?page=2"
        );
        assert_eq!(
            target_url(&origin, "//evil.example/x", None).host_str(),
            Some("127.0.0.1")
        );
    }

    #[test]
    fn into_http_drops_hop_by_hop_headers() {
        let response = into_http(
            FetchResponse::new(200, "ok")
                .with_header("Content-Type", "text/plain")
                .with_header("Transfer-Encoding", "chunked"),
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("content-type").is_some());
        assert!(response.headers().get("transfer-encoding").is_none());
    }
}
