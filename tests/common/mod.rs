//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pi_agent::drivers::ProcessOutput;
use pi_agent::{
    CapabilityDriver, ChannelEvent, Connector, DriverError, DriverOutput, Error, EventChannel,
    ProcessRunner,
};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// How long to wait for an expected event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Mock event channel driven by a `MockLink`
pub struct MockChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    sent: mpsc::UnboundedSender<(String, Value)>,
}

#[async_trait]
impl EventChannel for MockChannel {
    async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    async fn emit(&mut self, event: &str, payload: Value) -> pi_agent::Result<()> {
        self.sent
            .send((event.to_string(), payload))
            .map_err(|_| Error::Channel("test link dropped".to_string()))
    }

    async fn close(&mut self) {
        self.events.close();
    }
}

/// Server side of one scripted connection
pub struct MockLink {
    events: mpsc::UnboundedSender<ChannelEvent>,
    sent: mpsc::UnboundedReceiver<(String, Value)>,
}

impl MockLink {
    /// Deliver a notification to the agent
    pub fn push(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    /// Acknowledge the connection
    pub fn connect(&self) {
        self.push(ChannelEvent::Connected);
    }

    /// Deliver a named event
    pub fn event(&self, name: &str, payload: Value) {
        self.push(ChannelEvent::Event {
            name: name.to_string(),
            payload,
        });
    }

    /// Drop the connection from the server side
    pub fn disconnect(&self) {
        self.push(ChannelEvent::Disconnected {
            reason: "transport close".to_string(),
        });
    }

    /// Next event the agent sent, panicking after `EVENT_TIMEOUT`
    pub async fn next_sent(&mut self) -> (String, Value) {
        tokio::time::timeout(EVENT_TIMEOUT, self.sent.recv())
            .await
            .expect("timed out waiting for an outbound event")
            .expect("agent dropped the channel")
    }

    /// Assert nothing is sent within `window`
    pub async fn assert_silent(&mut self, window: Duration) {
        if let Ok(Some((name, payload))) = tokio::time::timeout(window, self.sent.recv()).await {
            panic!("unexpected outbound event {name}: {payload}");
        }
    }
}

/// Connector handing out scripted connections in order
///
/// Fails once the script runs out
#[derive(Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<MockChannel>>,
    attempts: AtomicUsize,
}

impl MockConnector {
    /// Script the next successful connection
    pub fn add_link(&self) -> MockLink {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        self.script.lock().unwrap().push_back(MockChannel {
            events: events_rx,
            sent: sent_tx,
        });
        MockLink {
            events: events_tx,
            sent: sent_rx,
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &str) -> pi_agent::Result<Box<dyn EventChannel>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(channel) => Ok(Box::new(channel)),
            None => Err(Error::Connection(format!("{endpoint} unreachable"))),
        }
    }
}

/// Process runner that records invocations and always succeeds
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[String], _timeout: Duration) -> io::Result<ProcessOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{program} {}", args.join(" ")));
        Ok(ProcessOutput {
            status: Some(0),
            ..ProcessOutput::default()
        })
    }
}

/// Driver that takes `delay` per call and tracks concurrency
pub struct SlowDriver {
    capability: &'static str,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    started: AtomicUsize,
}

impl SlowDriver {
    pub fn new(capability: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            capability,
            delay,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
        })
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` calls have started
    pub async fn wait_started(&self, n: usize) {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            while self.started() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("driver call never started");
    }
}

impl CapabilityDriver for SlowDriver {
    fn capability(&self) -> &str {
        self.capability
    }

    fn execute(&self, command: &str, _payload: &Map<String, Value>) -> Result<DriverOutput, DriverError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        std::thread::sleep(self.delay);

        self.active.fetch_sub(1, Ordering::SeqCst);
        match command {
            "take_photo" => Ok(DriverOutput::Artifact("cGhvdG8=".to_string())),
            other => Err(DriverError::InvalidCommand(format!("unknown command '{other}'"))),
        }
    }
}
