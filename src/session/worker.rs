//! Per-capability execution contexts
//!
//! Each physical capability gets one worker task with a bounded queue.
//! The worker runs one driver call at a time on the blocking pool, so the
//! session loop keeps serving the channel while hardware is busy.
//!
//! Jobs carry the generation of the connection they arrived on. A job is
//! only run while that generation is still the live one, so commands left
//! in the queue when a connection drops never reach the hardware.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::dispatch::Dispatcher;
use crate::events::{InboundCommand, OutboundEvent};

/// Event produced by a worker, tagged with the connection it belongs to
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub generation: u64,
    pub event: OutboundEvent,
}

/// Why a command could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Queue is full
    Busy,
    /// Worker task has exited
    Stopped,
}

struct Job {
    generation: u64,
    command: InboundCommand,
}

/// Serializes driver calls for one capability
pub struct CapabilityWorker {
    capability: String,
    queue: mpsc::Sender<Job>,
    task: JoinHandle<()>,
}

impl CapabilityWorker {
    /// Spawn a worker accepting up to `depth` queued commands (at least one)
    /// behind the one in flight
    ///
    /// `live` holds the generation of the registered connection, `0` while
    /// there is none
    ///
    /// Must be called from within a tokio runtime
    #[must_use]
    pub fn spawn(
        capability: &str,
        dispatcher: Arc<Dispatcher>,
        depth: usize,
        live: Arc<AtomicU64>,
        results: mpsc::Sender<WorkerResult>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let task = tokio::spawn(run(capability.to_string(), rx, dispatcher, live, results));

        Self {
            capability: capability.to_string(),
            queue: tx,
            task,
        }
    }

    #[must_use]
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Queue a command without waiting
    ///
    /// # Errors
    ///
    /// Returns `SubmitError::Busy` if the queue is full
    pub fn try_submit(&self, generation: u64, command: InboundCommand) -> Result<(), SubmitError> {
        self.queue
            .try_send(Job {
                generation,
                command,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => SubmitError::Busy,
                TrySendError::Closed(_) => SubmitError::Stopped,
            })
    }
}

impl Drop for CapabilityWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    capability: String,
    mut jobs: mpsc::Receiver<Job>,
    dispatcher: Arc<Dispatcher>,
    live: Arc<AtomicU64>,
    results: mpsc::Sender<WorkerResult>,
) {
    tracing::debug!(capability = %capability, "capability worker started");

    while let Some(job) = jobs.recv().await {
        let Job {
            generation,
            command,
        } = job;

        if generation != live.load(Ordering::SeqCst) {
            tracing::debug!(
                capability = %capability,
                command = %command.command,
                "skipping command queued on a closed connection"
            );
            continue;
        }

        let d = Arc::clone(&dispatcher);
        let event = match tokio::task::spawn_blocking(move || d.handle(&command)).await {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(capability = %capability, error = %e, "driver call panicked");
                OutboundEvent::error(
                    dispatcher.identity().id(),
                    &capability,
                    format!("driver call failed: {e}"),
                )
            }
        };

        if results.send(WorkerResult { generation, event }).await.is_err() {
            break;
        }
    }

    tracing::debug!(capability = %capability, "capability worker stopped");
}
