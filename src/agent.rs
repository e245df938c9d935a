//! Startup wiring: drivers, dispatcher and session from configuration

use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::AgentConfig;
use crate::dispatch::Dispatcher;
use crate::drivers::{CameraDriver, CapabilityDriver, LedDriver, ProcessRunner};
use crate::identity::{CAMERA, LED_CONTROL};
use crate::session::SessionManager;
use crate::{Error, Result};

/// Build one driver per declared capability
///
/// # Errors
///
/// Returns `Error::Config` for capabilities this build cannot drive
pub fn build_drivers(
    config: &AgentConfig,
    runner: &Arc<dyn ProcessRunner>,
) -> Result<Vec<Arc<dyn CapabilityDriver>>> {
    config
        .identity
        .capabilities()
        .iter()
        .map(|capability| -> Result<Arc<dyn CapabilityDriver>> {
            match capability.as_str() {
                LED_CONTROL => Ok(Arc::new(LedDriver::new(
                    config.led_pin,
                    config.gpio_program.clone(),
                    Arc::clone(runner),
                ))),
                CAMERA => Ok(Arc::new(CameraDriver::new(
                    config.camera.clone(),
                    Arc::clone(runner),
                ))),
                other => Err(Error::Config(format!("no driver for capability '{other}'"))),
            }
        })
        .collect()
}

/// Prepare hardware and build the dispatcher
///
/// Hardware setup failures are logged, not fatal: the agent still
/// registers and reports the fault on each command
///
/// # Errors
///
/// Returns `Error::Config` if drivers and identity disagree
pub fn build_dispatcher(config: &AgentConfig, runner: &Arc<dyn ProcessRunner>) -> Result<Dispatcher> {
    let drivers = build_drivers(config, runner)?;

    for driver in &drivers {
        if let Err(e) = driver.prepare() {
            tracing::error!(capability = %driver.capability(), error = %e, "hardware setup failed");
        }
    }

    Dispatcher::new(config.identity.clone(), drivers)
}

/// Build a session manager for `config`
///
/// # Errors
///
/// Returns `Error::Config` if the dispatcher cannot be built
pub fn build_session(config: &AgentConfig, runner: &Arc<dyn ProcessRunner>) -> Result<SessionManager> {
    let dispatcher = build_dispatcher(config, runner)?;
    Ok(SessionManager::new(
        config.server_url.clone(),
        Arc::new(dispatcher),
        config.session.clone(),
    ))
}

/// Send a shutdown request once `signal` fires
///
/// If the signal cannot be listened for, `shutdown` is held open for the
/// life of the process: a closed channel reads as a shutdown request, and
/// the agent should keep running until stopped some other way.
pub async fn forward_shutdown<F>(signal: F, shutdown: mpsc::Sender<()>)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            tracing::info!("shutdown requested");
            let _ = shutdown.send(()).await;
        }
        Err(e) => {
            tracing::error!(error = %e, "cannot listen for shutdown signal, agent must be stopped externally");
            std::future::pending::<()>().await;
        }
    }
}
