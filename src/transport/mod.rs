//! Bidirectional named-event channel to the control server
//!
//! The session manager only sees these traits; the Socket.IO client is
//! one implementation.

pub mod socketio;

use async_trait::async_trait;

use crate::Result;

pub use socketio::SocketIoConnector;

/// Notification from an open channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The server acknowledged the connection
    Connected,
    /// A named event with its payload
    Event {
        name: String,
        payload: serde_json::Value,
    },
    /// The connection is gone
    Disconnected { reason: String },
}

/// An open connection carrying named events both ways
#[async_trait]
pub trait EventChannel: Send {
    /// Next notification, `None` once the channel is exhausted
    ///
    /// Must be cancel-safe: it is polled inside `select!`
    async fn recv(&mut self) -> Option<ChannelEvent>;

    /// Send a named event
    ///
    /// # Errors
    ///
    /// Returns error if the event cannot be written to the connection
    async fn emit(&mut self, event: &str, payload: serde_json::Value) -> Result<()>;

    /// Close the connection
    async fn close(&mut self);
}

/// Opens event channels to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new channel to `endpoint`
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the endpoint cannot be reached
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn EventChannel>>;
}
