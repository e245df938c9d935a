//! Command dispatch to capability drivers
//!
//! The dispatcher is the boundary where driver failures become values:
//! every command produces exactly one `OutboundEvent`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::drivers::{CapabilityDriver, DriverOutput};
use crate::events::{InboundCommand, OutboundEvent, now_timestamp};
use crate::identity::DeviceIdentity;
use crate::{Error, Result};

/// Message reported for commands to capabilities this device lacks
pub const UNSUPPORTED_CAPABILITY: &str = "unsupported capability";

/// Routes commands to the driver registered for their capability
pub struct Dispatcher {
    identity: DeviceIdentity,
    drivers: HashMap<String, Arc<dyn CapabilityDriver>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut caps: Vec<&String> = self.drivers.keys().collect();
        caps.sort();
        f.debug_struct("Dispatcher")
            .field("identity", &self.identity)
            .field("drivers", &caps)
            .finish()
    }
}

impl Dispatcher {
    /// Build a dispatcher for `identity`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a driver serves a capability the identity
    /// does not declare, or two drivers serve the same capability
    pub fn new(
        identity: DeviceIdentity,
        drivers: impl IntoIterator<Item = Arc<dyn CapabilityDriver>>,
    ) -> Result<Self> {
        let mut table: HashMap<String, Arc<dyn CapabilityDriver>> = HashMap::new();

        for driver in drivers {
            let capability = driver.capability().to_string();
            if !identity.has_capability(&capability) {
                return Err(Error::Config(format!(
                    "driver for '{capability}' is not declared in device capabilities"
                )));
            }
            if table.insert(capability.clone(), driver).is_some() {
                return Err(Error::Config(format!(
                    "more than one driver registered for '{capability}'"
                )));
            }
        }

        Ok(Self {
            identity,
            drivers: table,
        })
    }

    #[must_use]
    pub const fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Capabilities that have a driver
    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    /// Whether a driver is registered for `capability`
    #[must_use]
    pub fn routes(&self, capability: &str) -> bool {
        self.drivers.contains_key(capability)
    }

    /// Handle one command, blocking for the duration of the driver call
    #[must_use]
    pub fn handle(&self, cmd: &InboundCommand) -> OutboundEvent {
        let device_id = self.identity.id();

        let Some(driver) = self.drivers.get(&cmd.capability) else {
            tracing::warn!(capability = %cmd.capability, command = %cmd.command, "no driver for capability");
            return OutboundEvent::error(device_id, &cmd.capability, UNSUPPORTED_CAPABILITY);
        };

        if cmd.command.trim().is_empty() {
            tracing::warn!(capability = %cmd.capability, "command missing or empty");
            return OutboundEvent::error(device_id, &cmd.capability, "invalid command: command is required");
        }

        tracing::debug!(capability = %cmd.capability, command = %cmd.command, "executing command");

        match driver.execute(&cmd.command, &cmd.payload) {
            Ok(DriverOutput::State(state)) => OutboundEvent::StatusUpdate {
                device_id: device_id.to_string(),
                capability: cmd.capability.clone(),
                state,
                timestamp: now_timestamp(),
            },
            Ok(DriverOutput::Artifact(data)) => OutboundEvent::ArtifactResult {
                device_id: device_id.to_string(),
                capability: cmd.capability.clone(),
                data,
                timestamp: now_timestamp(),
            },
            Err(e) => {
                tracing::error!(
                    capability = %cmd.capability,
                    command = %cmd.command,
                    error = %e,
                    "command failed"
                );
                OutboundEvent::error(device_id, &cmd.capability, e.to_string())
            }
        }
    }
}
