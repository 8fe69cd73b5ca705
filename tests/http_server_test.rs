//! Integration tests for the local control API

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use termsage::config::MemorySettings;
use termsage::doctor::ErrorDoctor;
use termsage::memory::ErrorMemory;
use termsage::server::{start_http_server, HttpServer, ServerState};
use termsage::terminal::SessionManager;

use common::simulated_settings;

const TOKEN: &str = "secret";

struct Harness {
    // Outlives the server thread; session creates and event pumps run on it
    _runtime: tokio::runtime::Runtime,
    server: Option<HttpServer>,
    base: String,
}

impl Harness {
    fn start() -> Self {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let memory = Some(Arc::new(
            ErrorMemory::open_in_memory(&MemorySettings::default()).unwrap(),
        ));
        let manager = Arc::new(SessionManager::new(simulated_settings(4), memory.clone()));
        let doctor = Arc::new(ErrorDoctor::with_providers(true, Vec::new()));
        let state = ServerState::new(manager, doctor, memory, runtime.handle().clone());

        let server = start_http_server(state, 0, Some(TOKEN.to_string())).unwrap();
        let base = format!("http://{}", server.addr());
        Self {
            _runtime: runtime,
            server: Some(server),
            base,
        }
    }

    fn call(&self, method: &str, path: &str, body: Option<Value>) -> (u16, Value) {
        let request = ureq::request(method, &format!("{}{}", self.base, path))
            .set("X-Termsage-Token", TOKEN);
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        match result {
            Ok(response) => (response.status(), response.into_json().unwrap_or(Value::Null)),
            Err(ureq::Error::Status(code, response)) => {
                (code, response.into_json().unwrap_or(Value::Null))
            }
            Err(e) => panic!("{} {} failed: {}", method, path, e),
        }
    }

    /// Poll the event backlog until the concatenated output contains `needle`
    fn wait_for_output(&self, id: &str, needle: &str) -> Vec<Value> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            let (status, body) = self.call("GET", &format!("/sessions/{}/events", id), None);
            assert_eq!(status, 200);
            events.extend(body["events"].as_array().cloned().unwrap_or_default());
            let output: String = events
                .iter()
                .filter_map(|e| e["chunk"].as_str())
                .collect();
            if output.contains(needle) {
                return events;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("no '{}' in output of {}: {:?}", needle, id, events);
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.shutdown();
        }
    }
}

#[test]
fn test_requests_need_the_token() {
    let harness = Harness::start();
    let result = ureq::get(&format!("{}/ping", harness.base)).call();
    assert!(matches!(result, Err(ureq::Error::Status(401, _))));

    let (status, body) = harness.call("GET", "/ping", None);
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, _) = harness.call("GET", "/nope", None);
    assert_eq!(status, 404);
}

#[test]
fn test_session_lifecycle() {
    let harness = Harness::start();

    let (status, body) = harness.call(
        "POST",
        "/sessions",
        Some(json!({ "id": "web", "cols": 100, "rows": 30 })),
    );
    assert_eq!(status, 201);
    assert_eq!(body["id"], "web");
    assert_eq!(body["mode"], "demo");

    let (status, _) = harness.call("POST", "/sessions", Some(json!({ "id": "web" })));
    assert_eq!(status, 409);

    let (status, _) = harness.call(
        "POST",
        "/sessions/web/input",
        Some(json!({ "data": "echo over http\r" })),
    );
    assert_eq!(status, 202);

    let events = harness.wait_for_output("web", "over http\r\n");
    assert_eq!(events[0]["type"], "created");

    let (status, _) = harness.call("POST", "/sessions/web/resize", Some(json!({ "cols": 120, "rows": 40 })));
    assert_eq!(status, 202);

    let (_, body) = harness.call("GET", "/sessions", None);
    assert_eq!(body["sessions"].as_array().unwrap().len(), 1);

    let (_, body) = harness.call("GET", "/stats", None);
    assert_eq!(body["terminal"]["active_sessions"], 1);
    assert!(body["memory"].is_object());

    let (status, _) = harness.call("DELETE", "/sessions/web", None);
    assert_eq!(status, 200);
    let (status, _) = harness.call("GET", "/sessions/web/events", None);
    assert_eq!(status, 404);
    let (status, _) = harness.call("DELETE", "/sessions/web", None);
    assert_eq!(status, 404);

    // Input for a closed session is accepted and dropped
    let (status, _) = harness.call("POST", "/sessions/web/input", Some(json!({ "data": "ls\r" })));
    assert_eq!(status, 202);
}

#[test]
fn test_session_limit_is_reported() {
    let harness = Harness::start();
    for i in 0..4 {
        let (status, _) = harness.call("POST", "/sessions", Some(json!({ "id": format!("s{}", i) })));
        assert_eq!(status, 201);
    }
    let (status, body) = harness.call("POST", "/sessions", Some(json!({})));
    assert_eq!(status, 429);
    assert!(body["error"].as_str().unwrap().contains("Maximum"));
}

#[test]
fn test_doctor_endpoints() {
    let harness = Harness::start();

    let (status, body) = harness.call(
        "POST",
        "/doctor/analyze",
        Some(json!({ "errorText": "Error: Cannot find module 'lodash'" })),
    );
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["source"], "quick-fix");
    assert_eq!(body["fixes"][0]["command"], "npm install lodash");

    let (status, body) = harness.call(
        "POST",
        "/doctor/apply",
        Some(json!({ "type": "execute_command", "command": "npm install lodash" })),
    );
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["action"], "execute_command");

    let (status, body) = harness.call("POST", "/doctor/apply", Some(json!({ "type": "reboot" })));
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);

    let (status, body) = harness.call("POST", "/doctor/toggle", Some(json!({ "enabled": false })));
    assert_eq!(status, 200);
    assert_eq!(body["enabled"], false);

    let (_, body) = harness.call(
        "POST",
        "/doctor/analyze",
        Some(json!({ "errorText": "Error: Cannot find module 'lodash'" })),
    );
    assert_eq!(body["success"], false);

    let (status, _) = harness.call("POST", "/doctor/analyze", Some(json!({ "nope": 1 })));
    assert_eq!(status, 400);
}

#[test]
fn test_patterns_are_listed() {
    let harness = Harness::start();
    harness.call("POST", "/sessions", Some(json!({ "id": "p" })));
    harness.call("POST", "/sessions/p/input", Some(json!({ "data": "yarn\r" })));
    harness.wait_for_output("p", "Command not found: yarn");

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let (status, body) = harness.call("GET", "/patterns?limit=5", None);
        assert_eq!(status, 200);
        assert_eq!(body["learning"], true);
        let patterns = body["patterns"].as_array().cloned().unwrap_or_default();
        if let Some(pattern) = patterns.first() {
            assert_eq!(pattern["category"], "command_not_found");
            break;
        }
        assert!(Instant::now() < deadline, "pattern never learned");
        std::thread::sleep(Duration::from_millis(20));
    }
}
