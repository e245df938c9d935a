//! Agent configuration
//!
//! Compiled-in defaults overlaid by `PI_AGENT_*` environment variables.
//! The server URL given on the command line wins over everything else.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::drivers::CameraSettings;
use crate::identity::{CAMERA, DeviceIdentity, LED_CONTROL};
use crate::session::{ReconnectPolicy, SessionOptions};
use crate::transport::socketio::socket_url;
use crate::{Error, Result};

/// Server used when none is configured
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3001";

/// Capabilities this build knows how to drive
pub const KNOWN_CAPABILITIES: &[&str] = &[LED_CONTROL, CAMERA];

/// Pi agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Control server endpoint
    pub server_url: String,

    /// Device identity announced at registration
    pub identity: DeviceIdentity,

    /// BCM pin number of the LED
    pub led_pin: u8,

    /// GPIO tool (`pinctrl`)
    pub gpio_program: String,

    /// Photo capture settings
    pub camera: CameraSettings,

    /// Session tuning (queue depth, reconnect policy)
    pub session: SessionOptions,
}

impl AgentConfig {
    /// Load configuration from the process environment
    ///
    /// `server_url` (from the command line) overrides `PI_AGENT_SERVER_URL`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a variable cannot be parsed or the
    /// resulting configuration is invalid
    pub fn from_env(server_url: Option<String>) -> Result<Self> {
        Self::from_lookup(server_url, |key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` to resolve variables
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a variable cannot be parsed or the
    /// resulting configuration is invalid
    pub fn from_lookup(
        server_url: Option<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let server_url = server_url
            .or_else(|| var("PI_AGENT_SERVER_URL"))
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

        let capabilities: Vec<String> = var("PI_AGENT_CAPABILITIES")
            .unwrap_or_else(|| KNOWN_CAPABILITIES.join(","))
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        let identity = DeviceIdentity::new(
            var("PI_AGENT_ID").unwrap_or_else(|| "pi-001".to_string()),
            var("PI_AGENT_LOCATION").unwrap_or_else(|| "home".to_string()),
            capabilities,
        );

        let defaults = CameraSettings::default();
        let camera = CameraSettings {
            program: var("PI_AGENT_CAMERA_PROGRAM").unwrap_or(defaults.program),
            width: parse_var(&var, "PI_AGENT_CAMERA_WIDTH", defaults.width)?,
            height: parse_var(&var, "PI_AGENT_CAMERA_HEIGHT", defaults.height)?,
            quality: parse_var(&var, "PI_AGENT_CAMERA_QUALITY", defaults.quality)?,
            capture_delay: Duration::from_millis(parse_var(
                &var,
                "PI_AGENT_CAMERA_DELAY_MS",
                u64::try_from(defaults.capture_delay.as_millis()).unwrap_or(1000),
            )?),
            timeout: Duration::from_secs(parse_var(
                &var,
                "PI_AGENT_CAMERA_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )?),
            work_dir: var("PI_AGENT_WORK_DIR").map_or(defaults.work_dir, PathBuf::from),
        };

        let session = SessionOptions {
            queue_depth: parse_var(&var, "PI_AGENT_QUEUE_DEPTH", SessionOptions::default().queue_depth)?,
            reconnect: ReconnectPolicy {
                max_attempts: var("PI_AGENT_RECONNECT_MAX_ATTEMPTS")
                    .map(|v| parse_value("PI_AGENT_RECONNECT_MAX_ATTEMPTS", &v))
                    .transpose()?,
                ..ReconnectPolicy::default()
            },
        };

        let config = Self {
            server_url,
            identity,
            led_pin: parse_var(&var, "PI_AGENT_LED_PIN", 17)?,
            gpio_program: var("PI_AGENT_GPIO_PROGRAM").unwrap_or_else(|| "pinctrl".to_string()),
            camera,
            session,
        };
        config.validate()?;

        Ok(config)
    }

    /// Check the configuration for startup errors
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        socket_url(&self.server_url)
            .map_err(|e| Error::Config(format!("invalid server url '{}': {e}", self.server_url)))?;

        if self.identity.id().is_empty() {
            return Err(Error::Config("device id must not be empty".to_string()));
        }

        if self.identity.capabilities().is_empty() {
            return Err(Error::Config("at least one capability is required".to_string()));
        }

        if let Some(unknown) = self
            .identity
            .capabilities()
            .iter()
            .find(|c| !KNOWN_CAPABILITIES.contains(&c.as_str()))
        {
            return Err(Error::Config(format!(
                "unknown capability '{unknown}' (known: {})",
                KNOWN_CAPABILITIES.join(", ")
            )));
        }

        if !(1..=100).contains(&self.camera.quality) {
            return Err(Error::Config(format!(
                "camera quality must be between 1 and 100, got {}",
                self.camera.quality
            )));
        }

        if self.session.queue_depth == 0 {
            return Err(Error::Config("queue depth must be at least 1".to_string()));
        }

        Ok(())
    }
}

fn parse_var<T: FromStr>(var: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    var(key).map_or(Ok(default), |v| parse_value(key, &v))
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("{key}: invalid value '{value}': {e}")))
}
