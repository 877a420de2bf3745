//! # Remote API Client
//!
//! JSON over HTTP with bearer-token authorization.
//!
//! ## Response Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Outcome                       │  Result                                │
//! │  ──────────────────────────────┼─────────────────────────────────────── │
//! │  2xx with JSON body            │  Ok(body)                              │
//! │  2xx with empty body           │  Ok(Value::Null)                       │
//! │  2xx with non-JSON body        │  Err(InvalidResponse)                  │
//! │  401 / 403                     │  Err(Unauthorized)                     │
//! │  other status                  │  Err(Remote { status, "HTTP s: text" })│
//! │  no answer (refused, timeout)  │  Err(Network)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use harbor_core::{Endpoint, Method};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// The seam between the engine and whatever serves the API.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Issues one request and returns the parsed response body.
    async fn send(
        &self,
        method: Method,
        endpoint: &Endpoint,
        payload: Option<&Value>,
    ) -> SyncResult<Value>;

    /// Whether the server answers at all. Any HTTP status counts as online.
    async fn probe(&self, endpoint: &Endpoint) -> bool {
        match self.send(Method::Get, endpoint, None).await {
            Ok(_) => true,
            Err(err) => !err.is_network_failure(),
        }
    }
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// reqwest-backed [`RemoteApi`].
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemote {
    /// Creates a client for `base_url`.
    ///
    /// ## Errors
    /// `InvalidUrl` if the base URL does not parse.
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> SyncResult<Self> {
        url::Url::parse(base_url)?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(HttpRemote {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Self::new(
            &config.api.base_url,
            config.api.auth_token.clone(),
            config.request_timeout(),
        )
    }

    /// Replaces the bearer token, e.g. after a re-login.
    pub fn set_auth_token(&mut self, token: Option<String>) {
        self.auth_token = token;
    }

    fn url_for(&self, endpoint: &Endpoint) -> String {
        if endpoint.is_absolute() {
            endpoint.as_str().to_string()
        } else {
            format!("{}{}", self.base_url, endpoint.as_str())
        }
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn send(
        &self,
        method: Method,
        endpoint: &Endpoint,
        payload: Option<&Value>,
    ) -> SyncResult<Value> {
        let url = self.url_for(endpoint);
        debug!(%method, %url, "Sending request");

        let mut request = self.client.request(to_reqwest(method), &url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = payload {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(SyncError::Remote {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown Status").to_string(),
            });
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|e| SyncError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(p: &str) -> Endpoint {
        Endpoint::parse(p).unwrap()
    }

    fn remote(server: &MockServer) -> HttpRemote {
        HttpRemote::new(
            &format!("{}/", server.uri()),
            Some("token-123".into()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_post_sends_bearer_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/messages"))
            .and(header("authorization", "Bearer token-123"))
            .and(body_json(json!({ "subject": "Hello" })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({ "message": { "id": "m-1" } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = remote(&server)
            .send(
                Method::Post,
                &endpoint("/api/messages"),
                Some(&json!({ "subject": "Hello" })),
            )
            .await
            .unwrap();

        assert_eq!(response["message"]["id"], "m-1");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(path("/api/fail"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(path("/api/auth"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(path("/api/empty"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let remote = remote(&server);

        let err = remote
            .send(Method::Put, &endpoint("/api/fail"), Some(&json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "HTTP 500: Internal Server Error");
        assert!(err.is_retryable());

        let err = remote
            .send(Method::Get, &endpoint("/api/auth"), None)
            .await
            .unwrap_err();
        assert!(err.is_auth_error());

        let ok = remote
            .send(Method::Delete, &endpoint("/api/empty"), None)
            .await
            .unwrap();
        assert_eq!(ok, Value::Null);
    }

    #[tokio::test]
    async fn test_non_json_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(path("/api/html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let err = remote(&server)
            .send(Method::Get, &endpoint("/api/html"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_failure() {
        let remote =
            HttpRemote::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();

        let err = remote
            .send(Method::Get, &endpoint("/api/messages"), None)
            .await
            .unwrap_err();
        assert!(err.is_network_failure());
        assert!(!remote.probe(&endpoint("/api/health")).await);
    }

    #[tokio::test]
    async fn test_probe_counts_any_status_as_online() {
        let server = MockServer::start().await;
        Mock::given(path("/api/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(remote(&server).probe(&endpoint("/api/health")).await);
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpRemote::new("not a url", None, Duration::from_secs(1)).unwrap_err();
        assert!(err.is_config_error());
    }
}
