//! HTTP request handlers for the control API.

use std::thread;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::respond_json;
use super::types::{
    CreateSessionRequest, CreateSessionResponse, InputRequest, ResizeRequest, ServerState,
    ToggleRequest,
};
use crate::doctor::DEFAULT_SCOPE;
use crate::domain::{AnalyzeRequest, ApplyFixRequest};
use crate::terminal::{CreateOptions, TerminalError};

const DEFAULT_PATTERN_LIMIT: usize = 50;

fn parse_body<T: serde::de::DeserializeOwned>(
    body: &str,
    request: tiny_http::Request,
) -> Option<(T, tiny_http::Request)> {
    match serde_json::from_str::<T>(body) {
        Ok(value) => Some((value, request)),
        Err(e) => {
            warn!("[termsage:http] Invalid JSON: {}", e);
            respond_json(
                request,
                400,
                serde_json::json!({ "error": format!("invalid_json: {}", e) }),
            );
            None
        }
    }
}

/// Session id from `/sessions/{id}` or `/sessions/{id}/{action}`
pub fn session_id_from_path<'a>(path: &'a str, action: Option<&str>) -> Option<&'a str> {
    let rest = path.strip_prefix("/sessions/")?;
    let id = match action {
        Some(action) => rest.strip_suffix(action)?.strip_suffix('/')?,
        None => rest,
    };
    (!id.is_empty() && !id.contains('/')).then_some(id)
}

/// Handle POST /sessions
pub fn handle_session_create(state: &ServerState, body: &str, request: tiny_http::Request) {
    let body = if body.trim().is_empty() { "{}" } else { body };
    let Some((req, request)) = parse_body::<CreateSessionRequest>(body, request) else {
        return;
    };

    let id = req
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if id.contains('/') {
        respond_json(request, 400, serde_json::json!({ "error": "invalid_session_id" }));
        return;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let options = CreateOptions {
        cols: req.cols,
        rows: req.rows,
        cwd: req.cwd,
    };

    let result = state.runtime.block_on(state.manager.create(&id, options, tx));
    match result {
        Ok(created) => {
            state.attach_backlog(&id, rx);
            info!("[termsage:http] Session {} created ({})", id, created.mode);
            let response = CreateSessionResponse {
                id,
                pid: created.pid,
                mode: created.mode,
            };
            respond_json(request, 201, serde_json::json!(response));
        }
        Err(e) => {
            let status = match e {
                TerminalError::DuplicateSession(_) => 409,
                TerminalError::SessionLimit(_) => 429,
                _ => 500,
            };
            respond_json(request, status, serde_json::json!({ "error": e.to_string() }));
        }
    }
}

/// Handle POST /sessions/{id}/input
pub fn handle_session_input(
    state: &ServerState,
    path: &str,
    body: &str,
    request: tiny_http::Request,
) {
    let Some(id) = session_id_from_path(path, Some("input")) else {
        respond_json(request, 400, serde_json::json!({ "error": "invalid_session_id" }));
        return;
    };
    let Some((req, request)) = parse_body::<InputRequest>(body, request) else {
        return;
    };

    // Unknown and ended sessions drop input silently
    state.manager.write(id, req.data.as_bytes());
    respond_json(request, 202, serde_json::json!({ "status": "ok" }));
}

/// Handle POST /sessions/{id}/resize
pub fn handle_session_resize(
    state: &ServerState,
    path: &str,
    body: &str,
    request: tiny_http::Request,
) {
    let Some(id) = session_id_from_path(path, Some("resize")) else {
        respond_json(request, 400, serde_json::json!({ "error": "invalid_session_id" }));
        return;
    };
    let Some((req, request)) = parse_body::<ResizeRequest>(body, request) else {
        return;
    };

    state.manager.resize(id, req.cols, req.rows);
    respond_json(request, 202, serde_json::json!({ "status": "ok" }));
}

/// Handle GET /sessions/{id}/events
pub fn handle_session_events(state: &ServerState, path: &str, request: tiny_http::Request) {
    let Some(id) = session_id_from_path(path, Some("events")) else {
        respond_json(request, 400, serde_json::json!({ "error": "invalid_session_id" }));
        return;
    };
    let Some(backlog) = state.backlog(id) else {
        respond_json(request, 404, serde_json::json!({ "error": "session_not_found" }));
        return;
    };

    let (events, dropped) = backlog.lock().unwrap_or_else(|e| e.into_inner()).drain();
    respond_json(
        request,
        200,
        serde_json::json!({ "events": events, "dropped": dropped }),
    );
}

/// Handle DELETE /sessions/{id}
pub fn handle_session_delete(state: &ServerState, path: &str, request: tiny_http::Request) {
    let Some(id) = session_id_from_path(path, None) else {
        respond_json(request, 400, serde_json::json!({ "error": "invalid_session_id" }));
        return;
    };

    let killed = state.manager.kill(id);
    let detached = state.detach_backlog(id);
    if killed || detached {
        respond_json(request, 200, serde_json::json!({ "status": "closed", "id": id }));
    } else {
        respond_json(request, 404, serde_json::json!({ "error": "session_not_found" }));
    }
}

pub fn handle_sessions_list(state: &ServerState, request: tiny_http::Request) {
    respond_json(
        request,
        200,
        serde_json::json!({ "sessions": state.manager.list() }),
    );
}

pub fn handle_capabilities(state: &ServerState, request: tiny_http::Request) {
    respond_json(request, 200, serde_json::json!(state.manager.capabilities()));
}

pub fn handle_stats(state: &ServerState, request: tiny_http::Request) {
    let memory = match state.memory.as_ref().map(|m| m.stats()) {
        Some(Ok(stats)) => serde_json::json!(stats),
        Some(Err(e)) => {
            warn!("[termsage:http] Failed to read pattern stats: {}", e);
            serde_json::Value::Null
        }
        None => serde_json::Value::Null,
    };

    respond_json(
        request,
        200,
        serde_json::json!({ "terminal": state.manager.stats(), "memory": memory }),
    );
}

/// Handle POST /doctor/analyze
///
/// Analysis can wait on an AI provider for a while, so it runs on its own
/// thread and the server keeps serving terminal traffic meanwhile.
pub fn handle_doctor_analyze(state: &ServerState, body: &str, request: tiny_http::Request) {
    let Some((req, request)) = parse_body::<AnalyzeRequest>(body, request) else {
        return;
    };

    let doctor = state.doctor.clone();
    let runtime = state.runtime.clone();
    let spawned = thread::Builder::new()
        .name("termsage-doctor".to_string())
        .spawn(move || {
            let result = runtime.block_on(doctor.analyze(&req));
            respond_json(request, 200, serde_json::json!(result));
        });
    if let Err(e) = spawned {
        error!("[termsage:http] Failed to start analysis thread: {}", e);
    }
}

/// Handle POST /doctor/apply
pub fn handle_doctor_apply(state: &ServerState, body: &str, request: tiny_http::Request) {
    let Some((req, request)) = parse_body::<ApplyFixRequest>(body, request) else {
        return;
    };

    match state.doctor.apply_fix(&req) {
        Ok(applied) => {
            let mut value = serde_json::json!(applied);
            if let Some(map) = value.as_object_mut() {
                map.insert("success".to_string(), serde_json::Value::Bool(true));
            }
            respond_json(request, 200, value);
        }
        Err(e) => respond_json(
            request,
            400,
            serde_json::json!({ "success": false, "error": e.to_string() }),
        ),
    }
}

/// Handle POST /doctor/toggle
pub fn handle_doctor_toggle(state: &ServerState, body: &str, request: tiny_http::Request) {
    let Some((req, request)) = parse_body::<ToggleRequest>(body, request) else {
        return;
    };

    let scope = req.scope.as_deref().unwrap_or(DEFAULT_SCOPE);
    state.doctor.set_enabled(scope, req.enabled);
    respond_json(
        request,
        200,
        serde_json::json!({ "scope": scope, "enabled": state.doctor.is_enabled(scope) }),
    );
}

/// Handle GET /patterns?limit=N
pub fn handle_patterns(state: &ServerState, query: Option<&str>, request: tiny_http::Request) {
    let limit = query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .find_map(|pair| pair.strip_prefix("limit="))
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_PATTERN_LIMIT);

    let Some(memory) = state.memory.as_ref() else {
        respond_json(
            request,
            200,
            serde_json::json!({ "patterns": [], "learning": false }),
        );
        return;
    };

    match memory.list_patterns(limit) {
        Ok(patterns) => respond_json(
            request,
            200,
            serde_json::json!({ "patterns": patterns, "learning": true }),
        ),
        Err(e) => {
            error!("[termsage:http] Failed to list patterns: {}", e);
            respond_json(request, 500, serde_json::json!({ "error": "pattern_store" }));
        }
    }
}
