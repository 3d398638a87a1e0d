//! The local route contract.

use std::sync::Arc;

use lockbox_daemon::{dispatch, Config, Daemon};
use lockbox_registry::MemoryRegistry;
use lockbox_testkit::{SessionParts, TestIdentity};
use serde_json::{json, Value};

fn daemon() -> Daemon {
    Daemon::new(
        Config::with_root("/tmp/lockbox-test").unwrap(),
        Arc::new(MemoryRegistry::new()),
    )
}

fn login_body(kind: &str, parts: &SessionParts) -> Vec<u8> {
    json!({
        "type": kind,
        "identity": parts.identity.to_raw().unwrap(),
        "auth": parts.auth.to_raw().unwrap(),
        "passphrase": parts.passphrase,
        "token": parts.token,
    })
    .to_string()
    .into_bytes()
}

fn call(daemon: &Daemon, method: &str, path: &str, body: &[u8]) -> (u16, Value) {
    let response = dispatch(daemon, method, path, body);
    (response.status, response.body)
}

#[test]
fn test_version() {
    let daemon = daemon();
    let (status, body) = call(&daemon, "GET", "/version", b"");
    assert_eq!(status, 200);
    assert_eq!(body, json!({"version": daemon.config().client_version}));
}

#[test]
fn test_login_status_logout() {
    let daemon = daemon();
    let alice = TestIdentity::new("alice");

    let (status, body) = call(&daemon, "GET", "/status", b"");
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({"type": "no_session", "token": false, "passphrase": false, "id": null})
    );

    let (status, body) = call(&daemon, "POST", "/login", &login_body("user", &alice.user_session()));
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["type"], "user");
    assert_eq!(body["token"], true);
    assert_eq!(body["id"], alice.id().to_hex());
    // Secrets never come back out.
    assert!(!body.to_string().contains(&alice.passphrase));

    let (status, body) = call(&daemon, "POST", "/login", &login_body("user", &alice.user_session()));
    assert_eq!(status, 409);
    assert_eq!(body["category"], "authorization");

    let (status, _) = call(&daemon, "POST", "/logout", b"");
    assert_eq!(status, 200);
    let (status, body) = call(&daemon, "POST", "/logout", b"");
    assert_eq!(status, 401);
    assert_eq!(body["category"], "authorization");
}

#[test]
fn test_machine_login() {
    let daemon = daemon();
    let owner = TestIdentity::new("owner");
    let bot = TestIdentity::new("bot");
    let parts = bot.machine_session(owner.id());

    let (status, body) = call(&daemon, "POST", "/login", &login_body("machine", &parts));
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["type"], "machine");
    assert_eq!(body["id"], parts.identity.id().to_hex());
}

#[test]
fn test_bad_login_requests() {
    let daemon = daemon();
    let alice = TestIdentity::new("alice");

    // Unknown session type is a typed 400, not a crash.
    let (status, body) = call(&daemon, "POST", "/login", &login_body("robot", &alice.user_session()));
    assert_eq!(status, 400);
    assert_eq!(body["category"], "input");

    let (status, _) = call(&daemon, "POST", "/login", b"{not json");
    assert_eq!(status, 400);

    // Shape mismatch.
    let (status, body) = call(&daemon, "POST", "/login", &login_body("machine", &alice.user_session()));
    assert_eq!(status, 401);
    assert!(body["message"].as_str().unwrap().contains("machine"));

    // Wrong passphrase.
    let mut parts = alice.user_session();
    parts.passphrase = "nope".into();
    let (status, _) = call(&daemon, "POST", "/login", &login_body("user", &parts));
    assert_eq!(status, 401);

    let (_, body) = call(&daemon, "GET", "/status", b"");
    assert_eq!(body["type"], "no_session");
}

#[test]
fn test_unknown_routes() {
    let daemon = daemon();
    assert_eq!(call(&daemon, "GET", "/login", b"").0, 405);
    assert_eq!(call(&daemon, "DELETE", "/status", b"").0, 405);
    assert_eq!(call(&daemon, "GET", "/credentials", b"").0, 404);
}
