//! A canned-response HTTP server standing in for the registry.
//!
//! Each accepted connection reads one request, records it, and answers with
//! the next queued [`StubResponse`], then closes. When the queue runs dry the
//! server answers `404` with an empty body.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// One canned response.
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// Written in order, flushed after each chunk.
    pub chunks: Vec<Vec<u8>>,
    /// Pause before the status line and between chunks.
    pub delay: Duration,
}

impl StubResponse {
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".into()),
            chunks: vec![body.to_string().into_bytes()],
            delay: Duration::ZERO,
        }
    }

    /// A response whose body is empty.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            chunks: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    /// A `200` progress stream, one frame per chunk.
    pub fn ndjson(frames: &[serde_json::Value]) -> Self {
        Self {
            status: 200,
            content_type: Some("application/x-ndjson".into()),
            chunks: frames
                .iter()
                .map(|f| format!("{}\n", f).into_bytes())
                .collect(),
            delay: Duration::ZERO,
        }
    }

    pub fn raw(status: u16, content_type: &str, body: &[u8]) -> Self {
        Self {
            status,
            content_type: Some(content_type.into()),
            chunks: vec![body.to_vec()],
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A request as the server saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

type Queue = Arc<Mutex<VecDeque<StubResponse>>>;
type Log = Arc<Mutex<Vec<RecordedRequest>>>;

/// Stub registry bound to an ephemeral localhost port.
pub struct StubServer {
    addr: SocketAddr,
    responses: Queue,
    requests: Log,
    handle: JoinHandle<()>,
}

impl StubServer {
    /// Start serving `responses` in order.
    pub async fn start(responses: Vec<StubResponse>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let responses: Queue = Arc::new(Mutex::new(responses.into()));
        let requests: Log = Arc::new(Mutex::new(Vec::new()));

        let handle = tokio::spawn({
            let responses = responses.clone();
            let requests = requests.clone();
            async move {
                loop {
                    match listener.accept().await {
                        Ok((socket, _)) => {
                            let responses = responses.clone();
                            let requests = requests.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, responses, requests).await {
                                    debug!(error = %e, "stub connection ended");
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                            break;
                        }
                    }
                }
            }
        });

        debug!(%addr, "stub registry listening");
        Ok(Self {
            addr,
            responses,
            requests,
            handle,
        })
    }

    /// Base URL, e.g. `http://127.0.0.1:40123`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue another response.
    pub fn push(&self, response: StubResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(socket: TcpStream, responses: Queue, requests: Log) -> io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    };

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    requests
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(RecordedRequest {
            method,
            path,
            query,
            headers,
            body,
        });

    let response = responses
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
        .unwrap_or_else(|| StubResponse::empty(404));

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, reason(response.status));
    if let Some(content_type) = &response.content_type {
        head.push_str(&format!("Content-Type: {}\r\n", content_type));
    }
    if response.chunks.len() <= 1 {
        let len = response.chunks.first().map(Vec::len).unwrap_or(0);
        head.push_str(&format!("Content-Length: {}\r\n", len));
    }
    head.push_str("Connection: close\r\n\r\n");
    writer.write_all(head.as_bytes()).await?;
    writer.flush().await?;

    for (i, chunk) in response.chunks.iter().enumerate() {
        if i > 0 && !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        writer.write_all(chunk).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
