//! Calls to the authentication endpoints.
//!
//! [`AuthApi`] is a thin typed wrapper around [`HttpClient`]. It knows the
//! request and response shapes of login, signup, refresh and logout but
//! holds no session state; that is the [`SessionManager`](crate::SessionManager)'s job.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Endpoints;
use crate::error::{Result, VoidlineError};
use crate::http::{HttpClient, HttpRequest, HttpResponse, Method};

/// Username and password for login.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Account details for signup.
#[derive(Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Tokens issued by login, signup and refresh.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Present on login and signup; refresh responses usually omit it.
    #[serde(default)]
    pub player_id: Option<String>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("player_id", &self.player_id)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct LogoutRequest {
    all_sessions: bool,
}

/// Typed client for the auth endpoints.
#[derive(Clone)]
pub struct AuthApi {
    http: Arc<dyn HttpClient>,
    endpoints: Endpoints,
}

impl AuthApi {
    /// Create an API client that sends through `http`.
    pub fn new(http: Arc<dyn HttpClient>, endpoints: Endpoints) -> Self {
        Self { http, endpoints }
    }

    /// The endpoint paths in use.
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Exchange credentials for a token pair.
    ///
    /// # Errors
    ///
    /// [`VoidlineError::AuthInvalidCredentials`] if the endpoint rejects the
    /// credentials; transport errors otherwise.
    pub async fn login(&self, credentials: &Credentials) -> Result<TokenPair> {
        let request = HttpRequest::new(Method::Post, &self.endpoints.login)
            .with_body(serde_json::to_value(credentials)?);
        credential_exchange(self.http.execute(request).await?)
    }

    /// Create an account and receive its first token pair.
    ///
    /// # Errors
    ///
    /// [`VoidlineError::AuthInvalidCredentials`] if the endpoint rejects the
    /// registration; [`VoidlineError::Http`] for conflicts such as a taken
    /// username.
    pub async fn signup(&self, registration: &Registration) -> Result<TokenPair> {
        let request = HttpRequest::new(Method::Post, &self.endpoints.signup)
            .with_body(serde_json::to_value(registration)?);
        credential_exchange(self.http.execute(request).await?)
    }

    /// Rotate the token pair. The presented refresh token is consumed by the
    /// server whether or not the caller manages to persist the result.
    ///
    /// # Errors
    ///
    /// [`VoidlineError::Http`] for any non-success response.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let request = HttpRequest::new(Method::Post, &self.endpoints.refresh)
            .with_body(serde_json::to_value(RefreshRequest { refresh_token })?);
        self.http.execute(request).await?.into_result()
    }

    /// Revoke the current session, or every session of the player.
    ///
    /// # Errors
    ///
    /// [`VoidlineError::Http`] for any non-success response.
    pub async fn logout(&self, access_token: &str, all_sessions: bool) -> Result<()> {
        let request = HttpRequest::new(Method::Post, &self.endpoints.logout)
            .with_bearer(Some(access_token.to_string()))
            .with_body(serde_json::to_value(LogoutRequest { all_sessions })?);
        let response = self.http.execute(request).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(response.into_error())
        }
    }
}

fn credential_exchange(response: HttpResponse) -> Result<TokenPair> {
    match response.status {
        400 | 401 | 403 => {
            debug!(status = response.status, "credentials rejected");
            Err(VoidlineError::AuthInvalidCredentials)
        }
        _ => response.into_result(),
    }
}

impl fmt::Debug for AuthApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthApi")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    /// Answers every request with one canned response and records requests.
    struct Canned {
        response: HttpResponse,
        seen: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpClient for Canned {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    fn api(status: u16, body: &str) -> (AuthApi, Arc<Canned>) {
        let canned = Arc::new(Canned {
            response: HttpResponse::new(status, body),
            seen: Mutex::new(Vec::new()),
        });
        let http: Arc<dyn HttpClient> = canned.clone();
        (AuthApi::new(http, Endpoints::default()), canned)
    }

    #[tokio::test]
    async fn login_posts_credentials() {
        let (api, canned) = api(
            200,
            r#"{"access_token":"a","refresh_token":"r","player_id":"p"}"#,
        );
        let pair = api.login(&Credentials::new("ann", "pw")).await.unwrap();
        assert_eq!(pair.access_token, "a");
        assert_eq!(pair.player_id.as_deref(), Some("p"));

        let seen = canned.seen.lock().unwrap();
        assert_eq!(seen[0].path, "/auth/login");
        assert_eq!(seen[0].body.as_ref().unwrap()["username"], "ann");
        assert!(seen[0].bearer.is_none());
    }

    #[tokio::test]
    async fn login_rejection_is_invalid_credentials() {
        for status in [400, 401, 403] {
            let (api, _) = api(status, r#"{"error":"nope"}"#);
            let err = api.login(&Credentials::new("ann", "bad")).await.unwrap_err();
            assert!(matches!(err, VoidlineError::AuthInvalidCredentials));
        }
    }

    #[tokio::test]
    async fn signup_conflict_is_http_error() {
        let (api, _) = api(409, r#"{"error":"taken","error_code":"USERNAME_TAKEN"}"#);
        let err = api
            .signup(&Registration::new("ann", "a@x", "pw"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(409));
    }

    #[tokio::test]
    async fn refresh_sends_token_and_rejects_failures() {
        let (api, canned) = api(401, r#"{"error":"revoked"}"#);
        let err = api.refresh("r1").await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        let seen = canned.seen.lock().unwrap();
        assert_eq!(seen[0].body.as_ref().unwrap()["refresh_token"], "r1");
    }

    #[tokio::test]
    async fn logout_carries_bearer_and_scope() {
        let (api, canned) = api(204, "");
        api.logout("a1", true).await.unwrap();
        let seen = canned.seen.lock().unwrap();
        assert_eq!(seen[0].bearer.as_deref(), Some("a1"));
        assert_eq!(seen[0].body.as_ref().unwrap()["all_sessions"], true);
    }

    #[test]
    fn debug_redacts_secrets() {
        let debug = format!("{:?}", Credentials::new("ann", "hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
