//! Event names exchanged with the control server

use std::collections::HashMap;

use crate::events::OutboundEvent;
use crate::identity::{CAMERA, LED_CONTROL};

/// Registration event, sent once per connection
pub const REGISTER_EVENT: &str = "register_pi";

/// Wire event names for one capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub capability: &'static str,
    /// Inbound command event
    pub command_event: &'static str,
    pub status_event: Option<&'static str>,
    pub artifact_event: Option<&'static str>,
    pub error_event: &'static str,
}

/// Routes understood by the control server
pub const ROUTES: &[Route] = &[
    Route {
        capability: LED_CONTROL,
        command_event: "led_command",
        status_event: Some("led_status"),
        artifact_event: None,
        error_event: "led_error",
    },
    Route {
        capability: CAMERA,
        command_event: "camera_command",
        status_event: None,
        artifact_event: Some("photo_data"),
        error_event: "photo_error",
    },
];

/// Dispatch table from event names to routes, built once at startup
#[derive(Debug, Clone)]
pub struct RouteTable {
    by_command: HashMap<&'static str, &'static Route>,
    by_capability: HashMap<&'static str, &'static Route>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(ROUTES)
    }
}

impl RouteTable {
    #[must_use]
    pub fn new(routes: &'static [Route]) -> Self {
        Self {
            by_command: routes.iter().map(|r| (r.command_event, r)).collect(),
            by_capability: routes.iter().map(|r| (r.capability, r)).collect(),
        }
    }

    /// Route for an inbound event name, `None` if the event is unrecognized
    #[must_use]
    pub fn inbound(&self, event: &str) -> Option<&'static Route> {
        self.by_command.get(event).copied()
    }

    /// Wire name for an outbound event
    #[must_use]
    pub fn outbound_name(&self, event: &OutboundEvent) -> Option<&'static str> {
        let route = self.by_capability.get(event.capability())?;
        match event {
            OutboundEvent::StatusUpdate { .. } => route.status_event,
            OutboundEvent::ArtifactResult { .. } => route.artifact_event,
            OutboundEvent::OperationError { .. } => Some(route.error_event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(capability: &str) -> OutboundEvent {
        OutboundEvent::StatusUpdate {
            device_id: "pi-001".to_string(),
            capability: capability.to_string(),
            state: "on".to_string(),
            timestamp: 0.0,
        }
    }

    #[test]
    fn inbound_lookup() {
        let table = RouteTable::default();
        assert_eq!(table.inbound("led_command").unwrap().capability, LED_CONTROL);
        assert_eq!(table.inbound("camera_command").unwrap().capability, CAMERA);
        assert!(table.inbound("register_pi").is_none());
        assert!(table.inbound("photo_update").is_none());
    }

    #[test]
    fn outbound_names() {
        let table = RouteTable::default();
        assert_eq!(table.outbound_name(&status(LED_CONTROL)), Some("led_status"));
        assert_eq!(
            table.outbound_name(&OutboundEvent::error("pi-001", CAMERA, "boom")),
            Some("photo_error")
        );
        assert_eq!(
            table.outbound_name(&OutboundEvent::ArtifactResult {
                device_id: "pi-001".to_string(),
                capability: CAMERA.to_string(),
                data: String::new(),
                timestamp: 0.0,
            }),
            Some("photo_data")
        );
    }

    #[test]
    fn missing_outbound_names() {
        let table = RouteTable::default();
        // The camera never reports a bare state change
        assert_eq!(table.outbound_name(&status(CAMERA)), None);
        assert_eq!(table.outbound_name(&status("thermostat")), None);
    }
}
