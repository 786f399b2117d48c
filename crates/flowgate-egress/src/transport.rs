//! Single-attempt upstream delivery
//!
//! [`UpstreamTransport`] performs exactly one HTTP exchange with no retry.
//! The retry loop in [`crate::retry`] is written against this trait so it
//! can be exercised without sockets.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::client::{HttpClientConfig, create_client};

/// A fully-buffered request ready to send upstream
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Deadline for one attempt
    pub timeout: Duration,
}

impl UpstreamRequest {
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            timeout,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Server-side failures are retried; everything else is final
    pub fn is_retryable(&self) -> bool {
        self.status.is_server_error()
    }
}

/// Failure of one attempt before a complete response was read
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream connection failed: {0}")]
    Connect(String),

    #[error("upstream request failed: {0}")]
    Request(String),
}

impl TransportError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, TransportError>;
}

/// Transport over a pooled `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &HttpClientConfig) -> crate::Result<Self> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.as_str())
            .headers(request.headers.clone())
            .body(request.body.clone())
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, request.timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(e, request.timeout))?;

        tracing::trace!(
            url = %request.url,
            status = status.as_u16(),
            bytes = body.len(),
            "Upstream responded"
        );

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new(&HttpClientConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_relays_status_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tasks"))
            .and(header("x-user-id", "u-1"))
            .and(body_string("{\"title\":\"x\"}"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-upstream", "yes")
                    .set_body_string("created"),
            )
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", "u-1".parse().unwrap());
        let request = UpstreamRequest::new(
            Method::POST,
            format!("{}/tasks", server.uri()),
            Duration::from_secs(5),
        )
        .with_headers(headers)
        .with_body(Bytes::from_static(b"{\"title\":\"x\"}"));

        let response = transport().send(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.headers.get("x-upstream").unwrap(), "yes");
        assert_eq!(response.body, Bytes::from_static(b"created"));
        assert!(!response.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_a_response_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let request = UpstreamRequest::new(Method::GET, server.uri(), Duration::from_secs(5));
        let response = transport().send(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.is_retryable());
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let timeout = Duration::from_millis(100);
        let request = UpstreamRequest::new(Method::GET, server.uri(), timeout);
        let err = transport().send(&request).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout(timeout));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop a listener to get a port nobody is serving
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let request = UpstreamRequest::new(
            Method::GET,
            format!("http://{}/", addr),
            Duration::from_secs(2),
        );
        let err = transport().send(&request).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "got {err:?}");
    }
}
