//! Transport implementations for the CFH lobby protocol.
//!
//! | Feature                | Transport              | Connector              |
//! |------------------------|------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] | [`WebSocketConnector`] |
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), cfh_client::CfhError> {
//! use cfh_client::transport::{Connector, Transport};
//! use cfh_client::WebSocketConnector;
//!
//! let connector = WebSocketConnector::new("localhost:8000");
//! assert_eq!(connector.url(), "ws://localhost:8000/ws");
//!
//! let mut ws = connector.connect().await?;
//! ws.send(r#"{"msg":"CreateGame"}"#.to_string()).await?;
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
