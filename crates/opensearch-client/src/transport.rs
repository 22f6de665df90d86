//! Request transport
//!
//! [`OpenSearchClient`](crate::OpenSearchClient) builds requests and decodes
//! responses; a [`Transport`] moves them. Production uses [`HttpTransport`];
//! reconciler tests inject an in-memory engine instead.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::ClientError;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP method of an engine request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// PUT
    Put,
    /// POST
    Post,
    /// DELETE
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Put => write!(f, "PUT"),
            Method::Post => write!(f, "POST"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// One request against the engine's REST API
#[derive(Clone, Debug, PartialEq)]
pub struct EngineRequest {
    /// Method
    pub method: Method,
    /// Path including any query string, starting with `/`
    pub path: String,
    /// JSON body
    pub body: Option<Value>,
}

impl EngineRequest {
    /// Request without a body
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    /// Attach a JSON body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Path without the query string
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }

    /// Value of one query parameter
    pub fn query_param(&self, key: &str) -> Option<&str> {
        let (_, query) = self.path.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

/// Raw engine response
#[derive(Clone, Debug, PartialEq)]
pub struct EngineResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
}

impl EngineResponse {
    /// Response with a JSON body
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Moves requests to the engine
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request; non-2xx statuses are returned, not raised
    async fn send(&self, request: EngineRequest) -> Result<EngineResponse, ClientError>;
}

/// Where and how to reach the engine
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Base URL, e.g. `https://logs.search.svc.cluster.local:9200`
    pub url: String,
    /// Basic auth user
    pub username: String,
    /// Basic auth password
    pub password: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Skip server certificate verification
    pub accept_invalid_certs: bool,
}

impl ConnectionConfig {
    /// Connection with the default timeout that trusts any server certificate
    pub fn new(url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
            accept_invalid_certs: true,
        }
    }
}

/// Transport over HTTPS with basic auth
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpTransport {
    /// Build a transport for the given connection
    pub fn new(config: ConnectionConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username,
            password: config.password,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: EngineRequest) -> Result<EngineResponse, ClientError> {
        let url = format!("{}{}", self.base_url, request.path);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };
        trace!(method = %request.method, path = %request.path, "Engine request");

        let mut builder = self
            .client
            .request(method, &url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| ClientError::Transport {
            operation: format!("{} {}", request.method, request.route()),
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| ClientError::Transport {
            operation: format!("{} {}", request.method, request.route()),
            message: format!("failed to read body: {}", e),
        })?;
        Ok(EngineResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_are_parsed() {
        let req = EngineRequest::new(
            Method::Put,
            "/_plugins/_ism/policies/hot-warm?if_seq_no=4&if_primary_term=1",
        );
        assert_eq!(req.route(), "/_plugins/_ism/policies/hot-warm");
        assert_eq!(req.query_param("if_seq_no"), Some("4"));
        assert_eq!(req.query_param("if_primary_term"), Some("1"));
        assert_eq!(req.query_param("missing"), None);
    }

    #[test]
    fn http_transport_trims_trailing_slash() {
        let transport =
            HttpTransport::new(ConnectionConfig::new("https://logs:9200/", "admin", "admin")).unwrap();
        assert_eq!(transport.base_url, "https://logs:9200");
    }
}
