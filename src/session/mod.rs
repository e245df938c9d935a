//! Connection lifecycle and event routing
//!
//! ```text
//! Disconnected ──start/drop──▶ Connecting ──ack──▶ Registered
//!      ▲                           │                   │
//!      └──────── failure ──────────┴────── drop ───────┘
//! ```
//!
//! Commands are only accepted while `Registered`. Results are tagged with
//! the connection generation that produced them; results from an earlier
//! connection are dropped rather than sent on a new one.

pub mod backoff;
pub mod routes;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};

use crate::dispatch::{Dispatcher, UNSUPPORTED_CAPABILITY};
use crate::events::{InboundCommand, OutboundEvent};
use crate::transport::{ChannelEvent, Connector, EventChannel};
use crate::{Error, Result};

pub use backoff::{ReconnectPolicy, delay_for_attempt};
pub use routes::{REGISTER_EVENT, Route, RouteTable};
pub use worker::{CapabilityWorker, SubmitError, WorkerResult};

/// Message reported when a capability queue is full
pub const BUSY: &str = "busy";

/// Buffered results between workers and the session loop
const RESULT_BUFFER: usize = 32;

/// Connection state, owned by the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Registered,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Registered => write!(f, "registered"),
        }
    }
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Commands queued per capability behind the one in flight
    pub queue_depth: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            queue_depth: 4,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// How a single connection ended
enum SessionEnd {
    Shutdown,
    Lost { registered: bool },
}

/// Owns the connection to the control server
pub struct SessionManager {
    endpoint: String,
    dispatcher: Arc<Dispatcher>,
    routes: RouteTable,
    options: SessionOptions,
    workers: HashMap<String, CapabilityWorker>,
    results_tx: mpsc::Sender<WorkerResult>,
    results: mpsc::Receiver<WorkerResult>,
    state: watch::Sender<ConnectionState>,
    generation: u64,
    /// Generation workers may run jobs for, `0` while not registered
    live: Arc<AtomicU64>,
}

impl SessionManager {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, dispatcher: Arc<Dispatcher>, options: SessionOptions) -> Self {
        let (results_tx, results) = mpsc::channel(RESULT_BUFFER);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            endpoint: endpoint.into(),
            dispatcher,
            routes: RouteTable::default(),
            options,
            workers: HashMap::new(),
            results_tx,
            results,
            state,
            generation: 0,
            live: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        if next != ConnectionState::Registered {
            self.live.store(0, Ordering::SeqCst);
        }
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = %prev, to = %next, "connection state changed");
        }
    }

    fn start_workers(&mut self) {
        let capabilities: Vec<String> = self.dispatcher.capabilities().map(str::to_string).collect();
        for capability in capabilities {
            self.workers.entry(capability.clone()).or_insert_with(|| {
                CapabilityWorker::spawn(
                    &capability,
                    Arc::clone(&self.dispatcher),
                    self.options.queue_depth,
                    Arc::clone(&self.live),
                    self.results_tx.clone(),
                )
            });
        }
    }

    /// Connect, register and serve commands until shutdown
    ///
    /// Lost connections are retried per the reconnect policy. Returns
    /// `Ok(())` when `shutdown` fires or its sender is dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` once the reconnect policy is exhausted
    pub async fn run(&mut self, connector: &dyn Connector, shutdown: &mut mpsc::Receiver<()>) -> Result<()> {
        self.start_workers();
        let mut failures: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            tracing::info!(endpoint = %self.endpoint, "connecting to control server");

            let attempt = tokio::select! {
                _ = shutdown.recv() => {
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                result = connector.connect(&self.endpoint) => result,
            };

            match attempt {
                Ok(channel) => match self.serve(channel, shutdown).await {
                    SessionEnd::Shutdown => {
                        self.set_state(ConnectionState::Disconnected);
                        tracing::info!("session closed");
                        return Ok(());
                    }
                    SessionEnd::Lost { registered } => {
                        if registered {
                            failures = 0;
                        }
                    }
                },
                Err(e) => tracing::warn!(endpoint = %self.endpoint, error = %e, "connection attempt failed"),
            }

            self.set_state(ConnectionState::Disconnected);
            failures = failures.saturating_add(1);

            if self.options.reconnect.exhausted(failures) {
                return Err(Error::Connection(format!(
                    "giving up on {} after {failures} failed attempts",
                    self.endpoint
                )));
            }

            let delay = delay_for_attempt(&self.options.reconnect, failures - 1);
            tracing::info!(?delay, "reconnecting");

            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Serve one open channel until it drops or shutdown is requested
    async fn serve(&mut self, mut channel: Box<dyn EventChannel>, shutdown: &mut mpsc::Receiver<()>) -> SessionEnd {
        let mut registered = false;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    channel.close().await;
                    return SessionEnd::Shutdown;
                }
                event = channel.recv() => {
                    let outcome = match event {
                        Some(ChannelEvent::Connected) if registered => {
                            tracing::debug!("duplicate connect acknowledgment ignored");
                            Ok(())
                        }
                        Some(ChannelEvent::Connected) => {
                            let outcome = self.register(channel.as_mut()).await;
                            registered = outcome.is_ok();
                            outcome
                        }
                        Some(ChannelEvent::Event { name, payload }) => {
                            self.on_event(channel.as_mut(), &name, payload).await
                        }
                        Some(ChannelEvent::Disconnected { reason }) => {
                            tracing::warn!(%reason, "disconnected from control server");
                            return SessionEnd::Lost { registered };
                        }
                        None => {
                            tracing::warn!("event channel closed");
                            return SessionEnd::Lost { registered };
                        }
                    };

                    if let Err(e) = outcome {
                        tracing::warn!(error = %e, "channel write failed, dropping connection");
                        channel.close().await;
                        return SessionEnd::Lost { registered };
                    }
                }
                Some(result) = self.results.recv() => {
                    if let Err(e) = self.on_result(channel.as_mut(), result).await {
                        tracing::warn!(error = %e, "channel write failed, dropping connection");
                        channel.close().await;
                        return SessionEnd::Lost { registered };
                    }
                }
            }
        }
    }

    /// Announce this device on a freshly acknowledged connection
    async fn register(&mut self, channel: &mut dyn EventChannel) -> Result<()> {
        let identity = self.dispatcher.identity();
        let payload = serde_json::to_value(identity.registration())?;
        channel.emit(REGISTER_EVENT, payload).await?;

        self.generation += 1;
        self.live.store(self.generation, Ordering::SeqCst);
        self.set_state(ConnectionState::Registered);
        tracing::info!(
            device_id = %identity.id(),
            location = %identity.location(),
            capabilities = ?identity.capabilities(),
            "registered with control server"
        );
        Ok(())
    }

    async fn on_event(
        &self,
        channel: &mut dyn EventChannel,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        if self.state() != ConnectionState::Registered {
            tracing::debug!(event = %name, "ignoring event received before registration");
            return Ok(());
        }

        let Some(route) = self.routes.inbound(name) else {
            tracing::debug!(event = %name, "ignoring unrecognized event");
            return Ok(());
        };

        let command = InboundCommand::from_payload(route.capability, payload);
        tracing::info!(capability = %command.capability, command = %command.command, "received command");

        let device_id = self.dispatcher.identity().id();
        let rejection = match self.workers.get(route.capability) {
            None => {
                tracing::warn!(capability = %route.capability, "command for capability without a driver");
                Some(OutboundEvent::error(device_id, route.capability, UNSUPPORTED_CAPABILITY))
            }
            Some(worker) => match worker.try_submit(self.generation, command) {
                Ok(()) => None,
                Err(SubmitError::Busy) => {
                    tracing::warn!(capability = %route.capability, "capability busy, command rejected");
                    Some(OutboundEvent::error(device_id, route.capability, BUSY))
                }
                Err(SubmitError::Stopped) => {
                    tracing::error!(capability = %route.capability, "capability worker stopped");
                    Some(OutboundEvent::error(device_id, route.capability, "capability worker stopped"))
                }
            },
        };

        match rejection {
            Some(event) => self.emit(channel, &event).await,
            None => Ok(()),
        }
    }

    async fn on_result(&self, channel: &mut dyn EventChannel, result: WorkerResult) -> Result<()> {
        if result.generation != self.generation || self.state() != ConnectionState::Registered {
            tracing::debug!(
                capability = %result.event.capability(),
                "dropping result from a previous connection"
            );
            return Ok(());
        }

        self.emit(channel, &result.event).await
    }

    async fn emit(&self, channel: &mut dyn EventChannel, event: &OutboundEvent) -> Result<()> {
        let Some(name) = self.routes.outbound_name(event) else {
            tracing::warn!(capability = %event.capability(), ?event, "no wire event for outbound event");
            return Ok(());
        };

        tracing::debug!(event = %name, capability = %event.capability(), "sending event");
        channel.emit(name, event.to_payload()).await
    }
}
