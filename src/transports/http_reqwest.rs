//! [`HttpClient`] implementation backed by `reqwest`.
//!
//! # Feature gate
//!
//! Only available with the `http-reqwest` feature (enabled by default).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, VoidlineError};
use crate::http::{HttpClient, HttpRequest, HttpResponse, Method};

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends [`HttpRequest`]s to a fixed base URL with `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestHttpClient {
    /// Create a client for `base_url` (e.g. `https://api.example.com/v1`).
    ///
    /// # Errors
    ///
    /// Returns [`VoidlineError::Io`] if the TLS backend cannot be initialized.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VoidlineError::Io(std::io::Error::other(e)))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wrap a pre-configured `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// The base URL requests are resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = self.url(&request.path);
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &url);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(id) = request.request_id {
            builder = builder.header("x-request-id", id.to_string());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                VoidlineError::Timeout
            } else {
                VoidlineError::TransportSend(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| VoidlineError::TransportReceive(e.to_string()))?;

        tracing::trace!(%url, status, "http response");
        Ok(HttpResponse { status, body })
    }
}
