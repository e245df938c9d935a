//! LED control via the `pinctrl` GPIO tool

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use super::{CapabilityDriver, DriverError, DriverOutput, ProcessRunner};
use crate::identity::LED_CONTROL;

/// Upper bound for a single `pinctrl` call
const GPIO_TIMEOUT: Duration = Duration::from_secs(5);

/// Output level for a GPIO pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedLevel {
    High,
    Low,
}

impl LedLevel {
    /// `pinctrl` level argument
    #[must_use]
    pub const fn as_arg(self) -> &'static str {
        match self {
            Self::High => "dh",
            Self::Low => "dl",
        }
    }

    /// State label reported to the server
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::High => "on",
            Self::Low => "off",
        }
    }

    fn from_command(command: &str) -> Option<Self> {
        match command {
            "on" => Some(Self::High),
            "off" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Drives an LED wired to a single GPIO pin
pub struct LedDriver {
    pin: u8,
    program: String,
    runner: Arc<dyn ProcessRunner>,
}

impl LedDriver {
    #[must_use]
    pub fn new(pin: u8, program: impl Into<String>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            pin,
            program: program.into(),
            runner,
        }
    }

    fn pinctrl(&self, mode: &str) -> Result<(), DriverError> {
        let args = vec!["set".to_string(), self.pin.to_string(), mode.to_string()];
        let output = self
            .runner
            .run(&self.program, &args, GPIO_TIMEOUT)
            .map_err(|e| DriverError::HardwareFault(format!("{}: {e}", self.program)))?;

        if !output.success() {
            return Err(DriverError::HardwareFault(format!(
                "{} {}",
                self.program,
                output.failure_detail()
            )));
        }

        Ok(())
    }
}

impl CapabilityDriver for LedDriver {
    fn capability(&self) -> &str {
        LED_CONTROL
    }

    fn prepare(&self) -> Result<(), DriverError> {
        self.pinctrl("op")?;
        tracing::info!(pin = self.pin, "GPIO pin configured as output");
        Ok(())
    }

    fn execute(
        &self,
        command: &str,
        _payload: &Map<String, Value>,
    ) -> Result<DriverOutput, DriverError> {
        let level = LedLevel::from_command(command)
            .ok_or_else(|| DriverError::InvalidCommand(format!("unknown LED command '{command}'")))?;

        self.pinctrl(level.as_arg())?;
        tracing::info!(pin = self.pin, state = level.label(), "LED switched");

        Ok(DriverOutput::State(level.label().to_string()))
    }
}
