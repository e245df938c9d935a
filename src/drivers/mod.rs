//! Capability drivers
//!
//! Each driver turns an abstract command for one capability into a
//! concrete external operation. Driver calls block; callers must run them
//! off the network event loop and never concurrently for one capability.

mod camera;
mod led;
mod process;

use serde_json::{Map, Value};
use thiserror::Error;

pub use camera::{CameraDriver, CameraSettings};
pub use led::{LedDriver, LedLevel};
pub use process::{ProcessOutput, ProcessRunner, SystemRunner};

/// Successful outcome of a driver call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOutput {
    /// New state label (e.g. `"on"`)
    State(String),
    /// Base64-encoded binary artifact
    Artifact(String),
}

/// Failure of a driver call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Unknown command value or missing payload field
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Capture primitive failed or produced no artifact
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// Hardware primitive returned an error
    #[error("hardware fault: {0}")]
    HardwareFault(String),
}

/// A driver for one physical capability
pub trait CapabilityDriver: Send + Sync {
    /// Capability name this driver serves (e.g. `led_control`)
    fn capability(&self) -> &str;

    /// One-time hardware setup, run before the agent connects
    ///
    /// # Errors
    ///
    /// Returns error if the hardware cannot be prepared
    fn prepare(&self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Execute a command, blocking until it completes
    ///
    /// # Errors
    ///
    /// Returns a `DriverError` describing why the command failed
    fn execute(&self, command: &str, payload: &Map<String, Value>)
    -> Result<DriverOutput, DriverError>;
}
