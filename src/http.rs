//! HTTP abstraction for the REST side of the backend.
//!
//! Like [`Transport`](crate::Transport) for the event stream, the
//! [`HttpClient`] trait keeps the session layer independent of any particular
//! HTTP stack. The `http-reqwest` feature provides
//! [`ReqwestHttpClient`](crate::transports::ReqwestHttpClient).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{Result, VoidlineError};
use crate::error_codes::parse_error_body;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// An outbound request, relative to the backend's base URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Path beginning with `/`.
    pub path: String,
    /// Bearer token for the `Authorization` header.
    pub bearer: Option<String>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
    /// Correlation ID sent as `x-request-id`.
    pub request_id: Option<Uuid>,
}

impl HttpRequest {
    /// Create a request with no body and no credentials.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            bearer: None,
            body: None,
            request_id: None,
        }
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach (or clear) the bearer token.
    #[must_use]
    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }

    /// Attach a correlation ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// A response status plus its raw body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, possibly empty.
    pub body: String,
}

impl HttpResponse {
    /// Build a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Build a response with a JSON body.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
    }

    /// `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `true` for 401.
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Parse the body as JSON. An empty body parses as `null`.
    ///
    /// # Errors
    ///
    /// Returns [`VoidlineError::Serialization`] if the body is not valid JSON
    /// for `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let text = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a success body as JSON, or convert a failure into
    /// [`VoidlineError::Http`].
    ///
    /// # Errors
    ///
    /// Returns [`VoidlineError::Http`] for non-2xx statuses and
    /// [`VoidlineError::Serialization`] for unparseable success bodies.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T> {
        if self.is_success() {
            self.parse()
        } else {
            Err(self.into_error())
        }
    }

    /// Convert this response into a [`VoidlineError::Http`].
    pub fn into_error(self) -> VoidlineError {
        let (message, error_code) = parse_error_body(&self.body);
        VoidlineError::Http {
            status: self.status,
            message,
            error_code,
        }
    }
}

/// Executes HTTP requests against the game backend.
///
/// Implementations return `Ok` for every response the server produced,
/// whatever its status; `Err` is reserved for requests that never got a
/// response (DNS failure, connection reset, timeout).
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send `request` and return the server's response.
    ///
    /// # Errors
    ///
    /// Returns a transport-level error if no response was received.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}
