//! The local route contract between the CLI and its daemon.
//!
//! | route | answer |
//! |---|---|
//! | `POST /login` | `200` with the status body, or an error |
//! | `POST /logout` | `200`, or `401` when logged out |
//! | `GET /status` | `200 {"type","token","passphrase","id"}` |
//! | `GET /version` | `200 {"version"}` |
//!
//! Errors answer `{"message", "category"}`. A body that cannot be encoded
//! answers `500 {"message":"Internal server error"}`. Socket handling lives
//! with the process bootstrap; this module only maps requests to responses.

use lockbox_core::{PrincipalEnvelope, RawPrincipal};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::daemon::Daemon;
use crate::error::{DaemonError, ErrorCategory, Result, SessionError};
use crate::session::{SessionKind, SessionType};

/// A response ready to be written by the socket server.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalResponse {
    pub status: u16,
    pub body: Value,
}

impl LocalResponse {
    fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status, body },
            Err(e) => {
                error!(error = %e, "failed to encode response");
                Self::internal_error()
            }
        }
    }

    fn internal_error() -> Self {
        Self {
            status: 500,
            body: json!({"message": "Internal server error"}),
        }
    }

    fn message(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "message": message }),
        }
    }

    fn error(e: &DaemonError) -> Self {
        let category = e.category();
        let status = match (e, category) {
            (DaemonError::Session(SessionError::AlreadyLoggedIn), _) => 409,
            (_, ErrorCategory::Input) => 400,
            (_, ErrorCategory::Authorization) => 401,
            (_, ErrorCategory::AccessControl) => 403,
            (_, ErrorCategory::Transport) | (_, ErrorCategory::Protocol) => 502,
            (_, ErrorCategory::Integrity) => 500,
        };
        Self {
            status,
            body: json!({
                "message": e.to_string(),
                "category": category.as_str(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(rename = "type")]
    kind: String,
    identity: Option<RawPrincipal>,
    auth: Option<RawPrincipal>,
    #[serde(default)]
    passphrase: String,
    #[serde(default)]
    token: String,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    #[serde(rename = "type")]
    kind: &'static str,
    token: bool,
    passphrase: bool,
    id: Option<String>,
}

#[derive(Debug, Serialize)]
struct VersionBody<'a> {
    version: &'a str,
}

/// Route one request.
pub fn dispatch(daemon: &Daemon, method: &str, path: &str, body: &[u8]) -> LocalResponse {
    debug!(method, path, "local request");
    let result = match (method, path) {
        ("POST", "/login") => login(daemon, body),
        ("POST", "/logout") => daemon
            .logout()
            .map(|()| LocalResponse::message(200, "Logged out")),
        ("GET", "/status") => Ok(status(daemon)),
        ("GET", "/version") => Ok(LocalResponse::json(
            200,
            &VersionBody {
                version: &daemon.config().client_version,
            },
        )),
        (_, "/login" | "/logout" | "/status" | "/version") => {
            return LocalResponse::message(405, "Method not allowed")
        }
        _ => return LocalResponse::message(404, "Not found"),
    };
    result.unwrap_or_else(|e| LocalResponse::error(&e))
}

fn login(daemon: &Daemon, body: &[u8]) -> Result<LocalResponse> {
    let request: LoginRequest = serde_json::from_slice(body)
        .map_err(|e| DaemonError::InvalidRequest(format!("login body: {}", e)))?;
    let kind: SessionType = request.kind.parse()?;
    let identity = decode_principal(request.identity.as_ref())?;
    let auth = decode_principal(request.auth.as_ref())?;

    daemon.login(kind, identity, auth, &request.passphrase, &request.token)?;
    Ok(status(daemon))
}

fn decode_principal(raw: Option<&RawPrincipal>) -> Result<Option<PrincipalEnvelope>> {
    raw.map(|raw| {
        PrincipalEnvelope::from_raw(raw)
            .map_err(|e| DaemonError::InvalidRequest(format!("{} envelope: {}", raw.kind, e)))
    })
    .transpose()
}

fn status(daemon: &Daemon) -> LocalResponse {
    let session = daemon.session();
    let kind = session.kind();
    let logged_in = kind != SessionKind::LoggedOut;
    LocalResponse::json(
        200,
        &StatusBody {
            kind: kind.as_str(),
            token: logged_in && session.has_token(),
            passphrase: logged_in && session.has_passphrase(),
            id: session.id().map(|id| id.to_hex()),
        },
    )
}
