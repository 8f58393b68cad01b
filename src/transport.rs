//! Transport abstraction for the CFH lobby protocol.
//!
//! The [`Transport`] trait is a bidirectional text message channel between
//! the client and server. Every frame is one JSON envelope, so transport
//! implementations handle framing internally.
//!
//! A [`Connector`] opens fresh transports. The
//! [`ConnectionManager`](crate::connection::ConnectionManager) calls it each
//! time it needs a physical connection, which keeps connection parameters
//! (host, scheme, TLS, timeouts) out of the sharing logic.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use cfh_client::error::CfhError;
//! use cfh_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), CfhError> {
//!         unimplemented!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, CfhError>> {
//!         // Return None when the connection is closed cleanly
//!         unimplemented!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), CfhError> {
//!         unimplemented!()
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     async fn connect(&self) -> Result<Box<dyn Transport>, CfhError> {
//!         Ok(Box::new(MyTransport {}))
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::CfhError;

/// A bidirectional text message transport.
///
/// Each call to [`send`](Transport::send) transmits one complete frame and
/// each call to [`recv`](Transport::recv) returns one complete frame.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is polled
/// inside `tokio::select!`. Channel-based implementations (e.g. wrapping
/// `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`CfhError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, message: String) -> Result<(), CfhError>;

    /// Receive the next text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly
    async fn recv(&mut self) -> Option<Result<String, CfhError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), CfhError>;
}

/// Opens new physical connections on demand.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a connected transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn connect(&self) -> Result<Box<dyn Transport>, CfhError>;
}
