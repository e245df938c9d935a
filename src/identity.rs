//! Device identity announced to the control server

use serde::Serialize;

/// LED capability name
pub const LED_CONTROL: &str = "led_control";

/// Camera capability name
pub const CAMERA: &str = "camera";

/// Immutable identity of this device
///
/// Built once at startup and sent with every registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    id: String,
    location: String,
    capabilities: Vec<String>,
}

/// Registration payload (`register_pi`)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration<'a> {
    pub pi_id: &'a str,
    pub location: &'a str,
    pub capabilities: &'a [String],
}

impl DeviceIdentity {
    /// Create an identity, dropping duplicate capability names
    ///
    /// Capability order is preserved as given
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        location: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut caps: Vec<String> = Vec::new();
        for cap in capabilities {
            let cap = cap.into();
            if !caps.contains(&cap) {
                caps.push(cap);
            }
        }

        Self {
            id: id.into(),
            location: location.into(),
            capabilities: caps,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Whether this device declares the given capability
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Build the registration payload for this identity
    #[must_use]
    pub fn registration(&self) -> Registration<'_> {
        Registration {
            pi_id: &self.id,
            location: &self.location,
            capabilities: &self.capabilities,
        }
    }
}
