//! Request client for the account endpoints.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

/// Log in with email and password
pub const LOGIN_PATH: &str = "/api/v1/login";
/// Create an account
pub const REGISTER_PATH: &str = "/api/v1/register";
/// Exchange a refresh token for a new pair
pub const REFRESH_PATH: &str = "/api/v1/refresh";
/// Look up the account owning the installed credential
pub const ME_PATH: &str = "/api/v1/me";

/// Upper bound for one request, connect through body
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Request errors
#[derive(Error, Debug)]
pub enum ApiError {
    /// Server answered with a non-success status
    #[error("request failed with status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: String,
    },
    /// Request never got a response
    #[error("transport error: {0}")]
    Transport(String),
    /// Response body was not the expected JSON
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    /// Request path could not be resolved against the origin
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// The server's `{"error": "..."}` message, if the body carried one
    pub fn server_message(&self) -> Option<String> {
        let ApiError::Status { body, .. } = self else {
            return None;
        };
        let value: Value = serde_json::from_str(body).ok()?;
        value
            .get("error")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
            .map(str::to_owned)
    }

    /// HTTP status, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.to_string())
    }
}

/// JSON request/response client with a process-wide bearer credential
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Send a request and return the decoded JSON body (`Null` when empty)
    async fn request(&self, method: Method, path: &str, body: Option<Value>)
        -> Result<Value, ApiError>;

    /// Install (`Some`) or remove (`None`) the bearer credential sent with every request
    async fn set_credential(&self, token: Option<String>);
}

/// [`ApiClient`] over `reqwest`
#[derive(Debug)]
pub struct HttpApiClient {
    client: reqwest::Client,
    origin: Url,
    credential: RwLock<Option<String>>,
}

impl HttpApiClient {
    /// Client for endpoints relative to `origin` with the default timeout
    pub fn new(origin: Url) -> Result<Self, ApiError> {
        Self::with_timeout(origin, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Client whose requests fail once `timeout` elapses
    pub fn with_timeout(origin: Url, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, origin))
    }

    /// Client reusing an existing `reqwest::Client`
    pub fn with_client(client: reqwest::Client, origin: Url) -> Self {
        Self {
            client,
            origin,
            credential: RwLock::new(None),
        }
    }

    /// Origin requests are resolved against
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Whether a bearer credential is installed
    pub async fn has_credential(&self) -> bool {
        self.credential.read().await.is_some()
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let url = self.origin.join(path)?;
        debug!("{} {}", method, url.path());

        let mut request = self.client.request(method, url);
        if let Some(token) = self.credential.read().await.as_deref() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        trace!("Response {} ({} bytes)", status, text.len());

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn set_credential(&self, token: Option<String>) {
        *self.credential.write().await = token;
    }
}
