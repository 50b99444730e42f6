//! WebSocket stream transport using `tokio-tungstenite`.
//!
//! [`WebSocketConnector`] opens an authorized connection to the streaming
//! endpoint, sending the bearer token in the `Authorization` header of the
//! upgrade request. Each open yields a [`WebSocketTransport`]. Both `ws://`
//! and `wss://` URLs are accepted.
//!
//! # Feature gate
//!
//! This module is only available when the `transport-websocket` feature is
//! enabled (it is enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), voidline_client::VoidlineError> {
//! use voidline_client::transport::{Connector, Transport};
//! use voidline_client::transports::WebSocketConnector;
//!
//! let connector = WebSocketConnector::new("ws://localhost:8080/stream");
//! let mut transport = connector.open("access-token").await?;
//!
//! if let Some(Ok(frame)) = transport.recv().await {
//!     println!("received: {frame}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::VoidlineError;
use crate::transport::{Connector, Transport};

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Default time allowed for the TCP + upgrade handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens [`WebSocketTransport`]s to a fixed streaming URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Create a connector for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the upgrade handshake timeout.
    ///
    /// Defaults to **10 seconds**.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The streaming URL this connector targets.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self, bearer_token: &str) -> Result<WsStream, VoidlineError> {
        tracing::debug!(url = %self.url, "connecting to stream endpoint");

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| io_error(std::io::ErrorKind::InvalidInput, e))?;
        let header = HeaderValue::from_str(&format!("Bearer {bearer_token}"))
            .map_err(|e| io_error(std::io::ErrorKind::InvalidInput, e))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        let (stream, _response) = tokio_tungstenite::connect_async(request).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            io_error(kind, e)
        })?;

        tracing::info!(url = %self.url, "stream connection established");
        Ok(stream)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, bearer_token: &str) -> Result<Box<dyn Transport>, VoidlineError> {
        let stream = tokio::time::timeout(self.connect_timeout, self.connect(bearer_token))
            .await
            .map_err(|_| VoidlineError::Timeout)??;
        Ok(Box::new(WebSocketTransport::from_stream(stream)))
    }
}

fn io_error<E>(kind: std::io::ErrorKind, error: E) -> VoidlineError
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    VoidlineError::Io(std::io::Error::new(kind, error))
}

/// A [`Transport`] backed by a WebSocket connection.
///
/// Only text frames carry events; pings are answered by tungstenite and
/// binary frames are skipped.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe. Dropping the future
/// returned by `recv` before it completes will not consume or lose any
/// frames, making it safe to use inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Wrap an already-established WebSocket stream.
    ///
    /// Useful when the caller needs custom TLS or proxy setup that
    /// [`WebSocketConnector`] does not expose.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn recv(&mut self) -> Option<Result<String, VoidlineError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(VoidlineError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // tungstenite queues the pong reply itself.
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    // Never produced by the read half.
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), VoidlineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| VoidlineError::TransportSend(e.to_string()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
        assert_send::<WebSocketConnector>();
    }

    /// Start a local WebSocket server that records the `Authorization`
    /// header of the upgrade request and then runs `handler`.
    async fn start_mock_server<F, Fut>(handler: F) -> (String, Arc<Mutex<Option<String>>>)
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen_auth = Arc::new(Mutex::new(None));
        let record = Arc::clone(&seen_auth);

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let auth = req
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                *record.lock().unwrap() = auth;
                Ok(resp)
            };
            let ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            handler(ws).await;
        });

        (format!("ws://{addr}"), seen_auth)
    }

    #[tokio::test]
    async fn open_sends_bearer_header() {
        let (url, seen_auth) = start_mock_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let connector = WebSocketConnector::new(url);
        let mut transport = connector.open("tok-123").await.unwrap();
        assert!(transport.recv().await.is_none());
        assert_eq!(seen_auth.lock().unwrap().as_deref(), Some("Bearer tok-123"));
    }

    #[tokio::test]
    async fn recv_receives_text_frames_and_skips_binary() {
        let (url, _) = start_mock_server(|mut ws| async move {
            ws.send(Message::Text(r#"{"type":"connected"}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"type":"heartbeat"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector::new(url).open("t").await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"type":"connected"}"#
        );
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"type":"heartbeat"}"#
        );
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn open_fails_with_unreachable_host() {
        let result = WebSocketConnector::new("ws://127.0.0.1:1").open("t").await;
        assert!(matches!(result, Err(VoidlineError::Io(_))));
    }

    #[tokio::test]
    async fn open_fails_with_invalid_url() {
        let result = WebSocketConnector::new("not a url").open("t").await;
        assert!(matches!(result, Err(VoidlineError::Io(_))));
    }

    #[tokio::test]
    async fn open_times_out() {
        // Non-routable address so the TCP connect hangs.
        let result = WebSocketConnector::new("ws://192.0.2.1:1")
            .with_connect_timeout(Duration::from_millis(50))
            .open("t")
            .await;
        assert!(matches!(result, Err(VoidlineError::Timeout)));
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let (url, _) =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketConnector::new(url).open("t").await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }
}
