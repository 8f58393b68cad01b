//! WebSocket transport using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries envelopes as text frames. Both `ws://` and
//! `wss://` are supported; TLS is handled by
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! [`WebSocketConnector`] knows where the game server lives. The server
//! always listens on the `/ws` path of its host, so the connector is built
//! from a host (plus an optional switch to the secure scheme) rather than
//! from a free-form URL.
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (on by default).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::CfhError;
use crate::transport::{Connector, Transport};

/// Path the game server serves its socket on.
pub const SOCKET_PATH: &str = "/ws";

/// Default timeout for establishing a connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future before it
/// completes does not lose a frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`CfhError::Io`] if the URL is invalid or the connection cannot
    /// be established. An underlying I/O error keeps its
    /// [`ErrorKind`](std::io::ErrorKind); other failures map to
    /// [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, CfhError> {
        tracing::debug!(url = %url, "connecting to WebSocket server");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            CfhError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "WebSocket connection established");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Like [`connect`](Self::connect), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CfhError::Timeout`] if the deadline elapses, or any error
    /// [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, CfhError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| CfhError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), CfhError> {
        if self.closed {
            return Err(CfhError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| CfhError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, CfhError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Some(Err(CfhError::TransportReceive(e.to_string()))),
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                // tungstenite queues the pong reply itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), CfhError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| CfhError::TransportSend(e.to_string()))
    }
}

/// Opens [`WebSocketTransport`]s to `{scheme}://{host}/ws`.
///
/// ```
/// use cfh_client::WebSocketConnector;
/// use std::time::Duration;
///
/// let connector = WebSocketConnector::new("cards.example.org")
///     .secure()
///     .with_connect_timeout(Duration::from_secs(3));
/// assert_eq!(connector.url(), "wss://cards.example.org/ws");
/// ```
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    host: String,
    secure: bool,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Connector for the plain-text scheme on `host` (`"name[:port]"`).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            secure: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Use `wss://` instead of `ws://`.
    #[must_use]
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Bound each connection attempt by `timeout`.
    ///
    /// Defaults to **10 seconds**.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The URL this connector dials.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}{SOCKET_PATH}", self.host)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, CfhError> {
        let transport =
            WebSocketTransport::connect_with_timeout(&self.url(), self.connect_timeout).await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
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

    use tokio::net::TcpListener;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[test]
    fn connector_builds_socket_url() {
        assert_eq!(
            WebSocketConnector::new("localhost:8000").url(),
            "ws://localhost:8000/ws"
        );
        assert_eq!(
            WebSocketConnector::new("example.org").secure().url(),
            "wss://example.org/ws"
        );
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, CfhError::Io(_)));
    }

    #[tokio::test]
    async fn connector_times_out_on_unroutable_host() {
        let connector = WebSocketConnector::new("192.0.2.1:1")
            .with_connect_timeout(Duration::from_millis(50));
        let err = match connector.connect().await {
            Ok(_) => panic!("expected connection to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, CfhError::Timeout | CfhError::Io(_)));
    }

    // ── Mock-server helpers ─────────────────────────────────────────

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the `host:port` to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        addr.to_string()
    }

    #[tokio::test]
    async fn connector_dials_ws_path_and_receives_text() {
        let host = start_mock_server(|mut ws| async move {
            ws.send(Message::Text(r#"{"msg":"JoinResponse","response":null}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector::new(host).connect().await.unwrap();
        let frame = transport.recv().await.unwrap().unwrap();
        assert_eq!(frame, r#"{"msg":"JoinResponse","response":null}"#);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let host = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&format!("ws://{host}/ws"))
            .await
            .unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, "after_binary");
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let host =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&format!("ws://{host}/ws"))
            .await
            .unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, CfhError::TransportClosed));
    }

    #[tokio::test]
    async fn send_reaches_server() {
        let host = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector::new(host).connect().await.unwrap();
        transport
            .send(r#"{"msg":"CreateGame"}"#.to_string())
            .await
            .unwrap();

        let echoed = transport.recv().await.unwrap().unwrap();
        assert_eq!(echoed, r#"{"msg":"CreateGame"}"#);
    }
}
