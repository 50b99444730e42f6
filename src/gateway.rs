//! Authenticated REST requests with transparent token renewal.
//!
//! [`RequestGateway::request`] attaches the current access token and, when
//! the server answers 401, runs the retry protocol:
//!
//! 1. wait `retry_grace` so a renewal started elsewhere can land;
//! 2. [`renew`](SessionManager::renew) and retry once with the new token; a
//!    second 401 forces a logout and fails with
//!    [`SessionExpired`](VoidlineError::SessionExpired);
//! 3. if renewal failed, wait `fallback_grace`, re-read the stored token and
//!    retry once only if a concurrent caller managed to rotate it.
//!
//! Auth endpoints bypass the protocol. A 401 on a request sent without any
//! token fails with [`Unauthorized`](VoidlineError::Unauthorized).

use std::fmt;
use std::sync::Arc;

use tracing::{debug, debug_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{Endpoints, GatewayConfig};
use crate::error::{Result, VoidlineError};
use crate::http::{HttpClient, HttpRequest, HttpResponse, Method};
use crate::session::{LogoutReason, SessionManager};

/// Sends requests on behalf of game features. Cheap to clone.
#[derive(Clone)]
pub struct RequestGateway {
    session: SessionManager,
    http: Arc<dyn HttpClient>,
    config: GatewayConfig,
    endpoints: Endpoints,
}

impl RequestGateway {
    /// Create a gateway that reads tokens from `session`.
    pub fn new(
        session: SessionManager,
        http: Arc<dyn HttpClient>,
        config: GatewayConfig,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            session,
            http,
            config,
            endpoints,
        }
    }

    /// The session tokens are read from.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// `GET path`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn get(&self, path: &str) -> Result<serde_json::Value> {
        self.request(Method::Get, path, None).await
    }

    /// `POST path` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        self.request(Method::Post, path, Some(body)).await
    }

    /// Send a request and parse the JSON response body. Empty bodies parse
    /// as `null`.
    ///
    /// # Errors
    ///
    /// - [`VoidlineError::SessionExpired`] when renewal cannot rescue a 401,
    ///   or when the session was force-logged-out and no token is available.
    /// - [`VoidlineError::Unauthorized`] for a 401 on a request sent without
    ///   a token.
    /// - [`VoidlineError::Http`] for any other non-success status.
    /// - Transport errors from the [`HttpClient`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let request_id = Uuid::new_v4();
        let span = debug_span!("request", %request_id, method = method.as_str(), path);
        async move {
            let response = self.send_with_renewal(method, path, body, request_id).await?;
            debug!(status = response.status, "response received");
            response.into_result()
        }
        .instrument(span)
        .await
    }

    async fn send_with_renewal(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        request_id: Uuid,
    ) -> Result<HttpResponse> {
        let build = |bearer: Option<String>| {
            let mut request = HttpRequest::new(method, path)
                .with_bearer(bearer)
                .with_request_id(request_id);
            if let Some(body) = &body {
                request = request.with_body(body.clone());
            }
            request
        };

        if self.endpoints.is_auth_path(path) {
            return self.http.execute(build(None)).await;
        }

        let token = self.session.access_token();
        if token.is_none() && self.session.is_session_expired() {
            debug!("session expired; rejecting locally");
            return Err(VoidlineError::SessionExpired);
        }

        let response = self.http.execute(build(token.clone())).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        let Some(used_token) = token else {
            self.session.force_logout(LogoutReason::Unauthorized).await;
            return Err(VoidlineError::Unauthorized);
        };

        debug!("401 with token attached; waiting before renewal");
        tokio::time::sleep(self.config.retry_grace).await;

        if let Some(renewed) = self.session.renew().await {
            let retry = self.http.execute(build(Some(renewed))).await?;
            if retry.is_unauthorized() {
                warn!("request rejected again after renewal");
                self.session.force_logout(LogoutReason::Retry401).await;
                return Err(VoidlineError::SessionExpired);
            }
            return Ok(retry);
        }

        // Renewal failed here, but a concurrent caller may still have rotated
        // the pair. The failed renew already forced a logout.
        tokio::time::sleep(self.config.fallback_grace).await;
        match self.session.access_token() {
            Some(current) if current != used_token => {
                debug!("token rotated elsewhere; retrying once");
                let retry = self.http.execute(build(Some(current))).await?;
                if retry.is_unauthorized() {
                    return Err(VoidlineError::SessionExpired);
                }
                Ok(retry)
            }
            _ => Err(VoidlineError::SessionExpired),
        }
    }
}

impl fmt::Debug for RequestGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestGateway")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
