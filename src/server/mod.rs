//! Local control API
//!
//! Listens on 127.0.0.1 and exposes the session manager, pattern memory and
//! error doctor over a small JSON protocol:
//! - Sessions under /sessions (create, input, resize, poll events, close)
//! - Doctor endpoints under /doctor/*
//! - Read-only /ping, /capabilities, /stats and /patterns

mod handlers;
mod types;

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tiny_http::{Response, Server};
use tracing::{error, info};

pub use handlers::session_id_from_path;
pub use types::{
    CreateSessionRequest, CreateSessionResponse, EventBacklog, InputRequest, ResizeRequest,
    ServerState, ToggleRequest, MAX_BACKLOG_EVENTS,
};

const AUTH_HEADER: &str = "X-Termsage-Token";
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024; // 2 MiB

type JsonResponse = Response<std::io::Cursor<Vec<u8>>>;

/// A running control API server
pub struct HttpServer {
    addr: SocketAddr,
    server: Arc<Server>,
    thread: Option<JoinHandle<()>>,
}

impl HttpServer {
    /// Address the listener is actually bound to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Block until the request loop exits
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Stop accepting requests and wait for the loop to finish
    pub fn shutdown(mut self) {
        self.server.unblock();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        info!("[termsage:http] Server on {} stopped", self.addr);
    }
}

/// Bind to `127.0.0.1:port` and serve requests on a background thread.
/// Port 0 picks a free port; see [`HttpServer::addr`].
pub fn start_http_server(
    state: ServerState,
    port: u16,
    auth_token: Option<String>,
) -> Result<HttpServer> {
    let bind_addr = format!("127.0.0.1:{}", port);
    let server = Server::http(&bind_addr)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Failed to start server on {}", bind_addr))?;
    let addr = server
        .server_addr()
        .to_ip()
        .context("Server is not bound to an IP address")?;

    let auth_token = auth_token.filter(|t| !t.trim().is_empty());
    info!(
        "[termsage:http] Server listening on http://{} (auth: {})",
        addr,
        if auth_token.is_some() { "enabled" } else { "disabled" }
    );

    let server = Arc::new(server);
    let loop_server = server.clone();
    let thread = thread::Builder::new()
        .name("termsage-http".to_string())
        .spawn(move || serve(&loop_server, &state, auth_token.as_deref()))
        .context("Failed to spawn server thread")?;

    Ok(HttpServer {
        addr,
        server,
        thread: Some(thread),
    })
}

fn serve(server: &Server, state: &ServerState, auth_token: Option<&str>) {
    for mut request in server.incoming_requests() {
        let method = request.method().to_string();
        let url = request.url().to_string();
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url.as_str(), None),
        };

        if !is_authorized(&request, auth_token) {
            let _ = request.respond(json_response("{\"error\":\"unauthorized\"}", 401));
            continue;
        }

        match (method.as_str(), path) {
            ("GET", "/ping") => {
                respond_json(
                    request,
                    200,
                    serde_json::json!({
                        "status": "ok",
                        "version": env!("CARGO_PKG_VERSION"),
                    }),
                );
            }
            ("GET", "/capabilities") => handlers::handle_capabilities(state, request),
            ("GET", "/stats") => handlers::handle_stats(state, request),
            ("GET", "/patterns") => handlers::handle_patterns(state, query, request),

            ("GET", "/sessions") => handlers::handle_sessions_list(state, request),
            ("POST", "/sessions") => {
                let body = match read_request_body(&mut request) {
                    Ok(body) => body,
                    Err(response) => {
                        let _ = request.respond(response);
                        continue;
                    }
                };
                handlers::handle_session_create(state, &body, request);
            }
            ("POST", p) if p.starts_with("/sessions/") && p.ends_with("/input") => {
                let body = match read_request_body(&mut request) {
                    Ok(body) => body,
                    Err(response) => {
                        let _ = request.respond(response);
                        continue;
                    }
                };
                handlers::handle_session_input(state, p, &body, request);
            }
            ("POST", p) if p.starts_with("/sessions/") && p.ends_with("/resize") => {
                let body = match read_request_body(&mut request) {
                    Ok(body) => body,
                    Err(response) => {
                        let _ = request.respond(response);
                        continue;
                    }
                };
                handlers::handle_session_resize(state, p, &body, request);
            }
            ("GET", p) if p.starts_with("/sessions/") && p.ends_with("/events") => {
                handlers::handle_session_events(state, p, request);
            }
            ("DELETE", p) if p.starts_with("/sessions/") => {
                handlers::handle_session_delete(state, p, request);
            }

            ("POST", "/doctor/analyze") => {
                let body = match read_request_body(&mut request) {
                    Ok(body) => body,
                    Err(response) => {
                        let _ = request.respond(response);
                        continue;
                    }
                };
                handlers::handle_doctor_analyze(state, &body, request);
            }
            ("POST", "/doctor/apply") => {
                let body = match read_request_body(&mut request) {
                    Ok(body) => body,
                    Err(response) => {
                        let _ = request.respond(response);
                        continue;
                    }
                };
                handlers::handle_doctor_apply(state, &body, request);
            }
            ("POST", "/doctor/toggle") => {
                let body = match read_request_body(&mut request) {
                    Ok(body) => body,
                    Err(response) => {
                        let _ = request.respond(response);
                        continue;
                    }
                };
                handlers::handle_doctor_toggle(state, &body, request);
            }

            _ => {
                let _ = request.respond(json_response("{\"error\":\"not_found\"}", 404));
            }
        }
    }
}

fn is_authorized(request: &tiny_http::Request, expected: Option<&str>) -> bool {
    let Some(expected) = expected.filter(|t| !t.trim().is_empty()) else {
        return true;
    };

    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(AUTH_HEADER))
        .map(|h| h.value.as_str() == expected)
        .unwrap_or(false)
}

fn json_response(body: impl Into<String>, status_code: u16) -> JsonResponse {
    let response = Response::from_string(body.into()).with_status_code(status_code);
    match tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

fn read_request_body(request: &mut tiny_http::Request) -> Result<String, JsonResponse> {
    let mut body = String::new();
    let mut reader = request.as_reader().take((MAX_BODY_BYTES + 1) as u64);
    if let Err(e) = reader.read_to_string(&mut body) {
        error!("[termsage:http] Failed to read body: {}", e);
        return Err(json_response("{\"error\":\"bad_request\"}", 400));
    }

    if body.len() > MAX_BODY_BYTES {
        return Err(json_response("{\"error\":\"payload_too_large\"}", 413));
    }

    Ok(body)
}

fn respond_json(request: tiny_http::Request, status_code: u16, value: serde_json::Value) {
    let body =
        serde_json::to_string(&value).unwrap_or_else(|_| "{\"error\":\"serialize\"}".to_string());
    let _ = request.respond(json_response(body, status_code));
}
