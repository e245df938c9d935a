//! Pi Agent - remote device agent for a Raspberry Pi
//!
//! Keeps a persistent connection to a control server, announces the
//! device's capabilities and executes LED and camera commands, reporting
//! results back asynchronously.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Control server                      │
//! └────────────────────┬────────────────────────────────┘
//!                      │ Socket.IO events
//! ┌────────────────────▼────────────────────────────────┐
//! │   Session manager (connect, register, reconnect)     │
//! └────────────────────┬────────────────────────────────┘
//!                      │ one worker per capability
//! ┌────────────────────▼────────────────────────────────┐
//! │   Dispatcher  →  LED driver (pinctrl)                │
//! │               →  Camera driver (rpicam-still)        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod drivers;
pub mod error;
pub mod events;
pub mod identity;
pub mod session;
pub mod transport;

pub use config::AgentConfig;
pub use dispatch::Dispatcher;
pub use drivers::{CapabilityDriver, DriverError, DriverOutput, ProcessRunner, SystemRunner};
pub use error::{Error, Result};
pub use events::{InboundCommand, OutboundEvent};
pub use identity::DeviceIdentity;
pub use session::{ConnectionState, SessionManager, SessionOptions};
pub use transport::{ChannelEvent, Connector, EventChannel, SocketIoConnector};
