//! Registry HTTP client.
//!
//! One request per logical call. Every request carries the bearer token
//! (omitted when empty), a fixed user agent, the registry protocol version
//! header, and a JSON content type. Responses are interpreted as:
//!
//! | response | outcome |
//! |---|---|
//! | 2xx | body decoded as JSON, else `MalformedResponse` |
//! | non-2xx, body | decoded as `{type, error[]}` into `Api`, else `MalformedResponse` |
//! | non-2xx, empty | `Status(code)` |
//! | no response | `Transport` |

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::cancel::CallOptions;
use crate::error::{ApiError, RegistryError, Result};
use crate::progress::{FrameReader, ProgressFn, NDJSON};

/// Header carrying the registry protocol version.
pub const REGISTRY_VERSION_HEADER: &str = "X-Registry-Version";

/// Product token of the user agent.
pub const USER_AGENT_PRODUCT: &str = "lockbox-daemon";

/// Read-only client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    /// Registry protocol version sent in [`REGISTRY_VERSION_HEADER`].
    pub api_version: String,
    /// Daemon version sent in the user agent.
    pub client_version: String,
    /// Client-side timeout; expiry surfaces as a transport error.
    pub timeout: Duration,
}

/// Supplies the bearer token for session-authorized requests.
pub trait TokenSource: Send + Sync {
    /// The current token, empty when unauthenticated.
    fn token(&self) -> String;
}

/// Authenticated registry client.
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    tokens: Arc<dyn TokenSource>,
}

impl RegistryClient {
    pub fn new(config: ClientConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
            tokens,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build a request authorized with the session token.
    pub fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Request> {
        let token = self.tokens.token();
        self.token_request(&token, method, path, query, body)
    }

    /// Build a request authorized with an explicit token.
    pub fn token_request<B: Serialize + ?Sized>(
        &self,
        token: &str,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Request> {
        let url = self.url(path, query)?;

        let mut headers = HeaderMap::new();
        if !token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| RegistryError::InvalidRequest("token is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        let agent = format!("{}/{}", USER_AGENT_PRODUCT, self.config.client_version);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&agent).map_err(|e| RegistryError::InvalidRequest(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            REGISTRY_VERSION_HEADER,
            HeaderValue::from_str(&self.config.api_version)
                .map_err(|e| RegistryError::InvalidRequest(e.to_string()))?,
        );

        let mut builder = self.http.request(method, url).headers(headers);
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| RegistryError::InvalidRequest(e.to_string()))?;
            builder = builder.body(bytes);
        }
        builder
            .build()
            .map_err(|e| RegistryError::InvalidRequest(e.to_string()))
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let base = self.config.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{}{}", base, path))
            .map_err(|e| RegistryError::InvalidRequest(e.to_string()))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Execute `request` and decode a JSON body.
    pub async fn execute<T: DeserializeOwned>(&self, request: Request, opts: &CallOptions) -> Result<T> {
        opts.run(async {
            let body = self.send(request).await?;
            decode_json(&body)
        })
        .await
    }

    /// Execute `request`, discarding any success body.
    pub async fn execute_empty(&self, request: Request, opts: &CallOptions) -> Result<()> {
        opts.run(async {
            self.send(request).await?;
            Ok::<_, RegistryError>(())
        })
        .await
    }

    /// Execute a request whose response may be a progress stream.
    ///
    /// `progress` is invoked once per intermediate frame; only the terminal
    /// frame's payload is returned. A plain JSON response is accepted too.
    pub async fn execute_with_progress<T: DeserializeOwned>(
        &self,
        mut request: Request,
        opts: &CallOptions,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<T> {
        request.headers_mut().insert(
            ACCEPT,
            HeaderValue::from_static("application/x-ndjson, application/json"),
        );

        opts.run(async {
            let response = self.dispatch(request).await?;
            if !is_ndjson(&response) {
                let body = check_response(response).await?;
                return decode_json(&body);
            }

            let mut reader = FrameReader::default();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                reader.push(&chunk?, progress)?;
            }
            let body = reader.finish(progress)?;
            serde_json::from_value(body).map_err(|e| RegistryError::MalformedResponse(e.to_string()))
        })
        .await
    }

    async fn dispatch(&self, request: Request) -> Result<Response> {
        let method = request.method().clone();
        let path = request.url().path().to_string();
        debug!(%method, %path, "registry request");

        let response = self.http.execute(request).await.map_err(|e| {
            warn!(%method, %path, error = %e, "registry unreachable");
            RegistryError::Transport(e)
        })?;
        debug!(%method, %path, status = response.status().as_u16(), "registry response");
        Ok(response)
    }

    async fn send(&self, request: Request) -> Result<bytes::Bytes> {
        let response = self.dispatch(request).await?;
        check_response(response).await
    }
}

fn is_ndjson(response: &Response) -> bool {
    response.status().is_success()
        && response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with(NDJSON))
            .unwrap_or(false)
}

/// Read the body and map non-2xx responses to errors.
async fn check_response(response: Response) -> Result<bytes::Bytes> {
    let status = response.status();
    let body = response.bytes().await?;
    check_status(status, &body)?;
    Ok(body)
}

pub(crate) fn check_status(status: StatusCode, body: &[u8]) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    if body.is_empty() {
        return Err(RegistryError::Status(status.as_u16()));
    }
    let mut err: ApiError = serde_json::from_slice(body).map_err(|_| {
        RegistryError::MalformedResponse(format!("malformed error response, status {}", status.as_u16()))
    })?;
    err.status = status.as_u16();
    Err(RegistryError::Api(err))
}

fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| RegistryError::MalformedResponse(e.to_string()))
}
