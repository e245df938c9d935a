//! Socket.IO (v5 protocol over Engine.IO v4) client on a WebSocket
//!
//! Only the default namespace and text packets are supported, which is
//! all the control server uses.
//!
//! Frame layout:
//! - Engine.IO: `0` open, `1` close, `2` ping, `3` pong, `4` message
//! - Socket.IO (inside `4`): `0` connect, `1` disconnect, `2` event,
//!   `4` connect error

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{ChannelEvent, Connector, EventChannel};
use crate::{Error, Result};

/// Socket.IO connect request for the default namespace
pub const CONNECT_FRAME: &str = "40";

/// Engine.IO pong
pub const PONG_FRAME: &str = "3";

/// Socket.IO disconnect for the default namespace
pub const DISCONNECT_FRAME: &str = "41";

/// Buffered notifications between the reader task and the session
const EVENT_BUFFER: usize = 100;

/// Time allowed for the WebSocket handshake and the connect acknowledgment
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Silence tolerated when the open packet carries no heartbeat settings
/// (Engine.IO defaults: 25 s interval plus 20 s timeout)
const DEFAULT_HEARTBEAT_WINDOW: Duration = Duration::from_secs(45);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Handshake data (`sid`, `pingInterval`, ...)
    Open(Value),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Noop,
}

/// Socket.IO packet carried in an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, payload: Value },
    ConnectError(Value),
    /// Acks and binary packets, which the agent never requests
    Unsupported(char),
}

/// Decode one text frame
///
/// # Errors
///
/// Returns `Error::Channel` for empty or malformed frames
pub fn decode(frame: &str) -> Result<EnginePacket> {
    let mut chars = frame.chars();
    let kind = chars
        .next()
        .ok_or_else(|| Error::Channel("empty frame".to_string()))?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping),
        '3' => Ok(EnginePacket::Pong),
        '4' => decode_socket(rest).map(EnginePacket::Message),
        '6' => Ok(EnginePacket::Noop),
        other => Err(Error::Channel(format!("unknown engine packet type '{other}'"))),
    }
}

fn decode_socket(body: &str) -> Result<SocketPacket> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| Error::Channel("empty socket packet".to_string()))?;
    let data = strip_namespace(chars.as_str());

    match kind {
        '0' => {
            if data.is_empty() {
                Ok(SocketPacket::Connect(None))
            } else {
                Ok(SocketPacket::Connect(Some(serde_json::from_str(data)?)))
            }
        }
        '1' => Ok(SocketPacket::Disconnect),
        '2' => decode_event(data),
        '4' => Ok(SocketPacket::ConnectError(
            serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_string())),
        )),
        other => Ok(SocketPacket::Unsupported(other)),
    }
}

/// Drop a `/nsp,` prefix if present
fn strip_namespace(data: &str) -> &str {
    if data.starts_with('/') {
        data.split_once(',').map_or("", |(_, rest)| rest)
    } else {
        data
    }
}

fn decode_event(data: &str) -> Result<SocketPacket> {
    // Optional ack id precedes the JSON array
    let json = data.trim_start_matches(|c: char| c.is_ascii_digit());
    let args: Vec<Value> = serde_json::from_str(json)?;
    let mut args = args.into_iter();

    let Some(Value::String(name)) = args.next() else {
        return Err(Error::Channel("event packet without a name".to_string()));
    };

    Ok(SocketPacket::Event {
        name,
        payload: args.next().unwrap_or(Value::Null),
    })
}

/// Encode an event for the default namespace
///
/// # Errors
///
/// Returns error if the payload cannot be serialized
pub fn encode_event(name: &str, payload: &Value) -> Result<String> {
    let body = serde_json::to_string(&[Value::String(name.to_string()), payload.clone()])?;
    Ok(format!("42{body}"))
}

/// Rewrite a server endpoint into its Socket.IO WebSocket URL
///
/// Accepts `http`, `https`, `ws` and `wss` endpoints
///
/// # Errors
///
/// Returns error if the endpoint is not a valid URL with a supported scheme
pub fn socket_url(endpoint: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint)?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::Config(format!(
                "unsupported server url scheme '{other}'"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::Config(format!("cannot use scheme '{scheme}' for {endpoint}")))?;

    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    url.set_fragment(None);

    Ok(url)
}

/// Longest silence allowed by the server's heartbeat settings
///
/// The server pings every `pingInterval` and waits `pingTimeout` for the
/// pong, so no frame for their sum means the connection is gone
#[must_use]
pub fn heartbeat_window(handshake: &Value) -> Option<Duration> {
    let interval = handshake.get("pingInterval")?.as_u64()?;
    let timeout = handshake.get("pingTimeout")?.as_u64()?;
    Some(Duration::from_millis(interval.saturating_add(timeout)))
}

/// Connects to Socket.IO servers
#[derive(Debug, Clone, Copy)]
pub struct SocketIoConnector {
    connect_timeout: Duration,
}

impl SocketIoConnector {
    /// Connector giving up on a connection not acknowledged within
    /// `connect_timeout`
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for SocketIoConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Connector for SocketIoConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn EventChannel>> {
        let url = socket_url(endpoint)?;
        tracing::debug!(url = %url, "opening websocket");

        let (ws, _) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        .map_err(|_| Error::Connection(format!("websocket connect to {url} timed out")))?
        .map_err(|e| Error::Connection(format!("websocket connect to {url} failed: {e}")))?;

        let (sink, stream) = ws.split();
        let sink: WsSink = Arc::new(Mutex::new(sink));
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let reader = tokio::spawn(read_frames(
            stream,
            Arc::clone(&sink),
            tx,
            self.connect_timeout,
        ));

        Ok(Box::new(SocketIoChannel {
            events: rx,
            sink,
            reader,
        }))
    }
}

/// An open Socket.IO session
pub struct SocketIoChannel {
    events: mpsc::Receiver<ChannelEvent>,
    sink: WsSink,
    reader: JoinHandle<()>,
}

impl SocketIoChannel {
    async fn send_frame(&self, frame: String) -> Result<()> {
        self.sink.lock().await.send(Message::Text(frame)).await?;
        Ok(())
    }
}

#[async_trait]
impl EventChannel for SocketIoChannel {
    async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    async fn emit(&mut self, event: &str, payload: Value) -> Result<()> {
        let frame = encode_event(event, &payload)?;
        self.send_frame(frame).await
    }

    async fn close(&mut self) {
        if let Err(e) = self.send_frame(DISCONNECT_FRAME.to_string()).await {
            tracing::debug!(error = %e, "failed to send disconnect packet");
        }
        let _ = self.sink.lock().await.close().await;
        self.reader.abort();
    }
}

impl Drop for SocketIoChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Pump frames from the socket, answering pings, until the connection ends
///
/// Runs as its own task so heartbeats are answered while the session is busy.
/// Ends the connection if the server falls silent for longer than its
/// heartbeat window, or does not acknowledge within `connect_timeout`.
async fn read_frames(
    mut stream: SplitStream<WsStream>,
    sink: WsSink,
    tx: mpsc::Sender<ChannelEvent>,
    connect_timeout: Duration,
) {
    let connect_deadline = Instant::now() + connect_timeout;
    let mut heartbeat: Option<Duration> = None;
    let mut connected = false;

    let reason = loop {
        let window = heartbeat.unwrap_or(DEFAULT_HEARTBEAT_WINDOW);
        let wait = if connected {
            window
        } else {
            window.min(connect_deadline.saturating_duration_since(Instant::now()))
        };

        let Ok(next) = tokio::time::timeout(wait, stream.next()).await else {
            if connected || Instant::now() < connect_deadline {
                break format!("ping timeout: no frame within {wait:?}");
            }
            break format!("no connect acknowledgment within {connect_timeout:?}");
        };

        let frame = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) => break "websocket closed by server".to_string(),
            Some(Ok(_)) => continue,
            Some(Err(e)) => break format!("websocket error: {e}"),
            None => break "websocket stream ended".to_string(),
        };

        let packet = match decode(&frame) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(error = %e, frame = %frame, "ignoring malformed frame");
                continue;
            }
        };

        let reply = match packet {
            EnginePacket::Open(handshake) => {
                tracing::debug!(%handshake, "engine.io session opened");
                heartbeat = Some(heartbeat_window(&handshake).unwrap_or(DEFAULT_HEARTBEAT_WINDOW));
                Some(CONNECT_FRAME)
            }
            EnginePacket::Ping => Some(PONG_FRAME),
            EnginePacket::Close => break "server closed the session".to_string(),
            EnginePacket::Message(SocketPacket::Connect(_)) => {
                connected = true;
                if tx.send(ChannelEvent::Connected).await.is_err() {
                    return;
                }
                None
            }
            EnginePacket::Message(SocketPacket::Event { name, payload }) => {
                if tx.send(ChannelEvent::Event { name, payload }).await.is_err() {
                    return;
                }
                None
            }
            EnginePacket::Message(SocketPacket::Disconnect) => {
                break "server disconnected the socket".to_string();
            }
            EnginePacket::Message(SocketPacket::ConnectError(detail)) => {
                break format!("connection rejected: {detail}");
            }
            EnginePacket::Message(SocketPacket::Unsupported(kind)) => {
                tracing::debug!(%kind, "ignoring unsupported socket.io packet");
                None
            }
            EnginePacket::Pong | EnginePacket::Noop => None,
        };

        if let Some(reply) = reply
            && let Err(e) = sink.lock().await.send(Message::Text(reply.to_string())).await
        {
            break format!("failed to write frame: {e}");
        }
    };

    let _ = tx.send(ChannelEvent::Disconnected { reason }).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_open_handshake() {
        let packet = decode(r#"0{"sid":"abc","pingInterval":25000,"pingTimeout":20000}"#).unwrap();
        let EnginePacket::Open(handshake) = packet else {
            panic!("expected open");
        };
        assert_eq!(handshake["sid"], "abc");
    }

    #[test]
    fn heartbeat_window_from_handshake() {
        let handshake = serde_json::json!({"sid": "abc", "pingInterval": 25000, "pingTimeout": 20000});
        assert_eq!(heartbeat_window(&handshake), Some(Duration::from_secs(45)));
        assert_eq!(heartbeat_window(&serde_json::json!({"sid": "abc"})), None);
        assert_eq!(
            heartbeat_window(&serde_json::json!({"pingInterval": "soon", "pingTimeout": 1})),
            None
        );
    }

    #[test]
    fn decodes_heartbeat_and_close() {
        assert_eq!(decode("2").unwrap(), EnginePacket::Ping);
        assert_eq!(decode("3").unwrap(), EnginePacket::Pong);
        assert_eq!(decode("1").unwrap(), EnginePacket::Close);
    }

    #[test]
    fn decodes_connect_ack() {
        let packet = decode(r#"40{"sid":"xyz"}"#).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::Connect(Some(serde_json::json!({"sid": "xyz"}))))
        );
        assert_eq!(decode("40").unwrap(), EnginePacket::Message(SocketPacket::Connect(None)));
    }

    #[test]
    fn decodes_event() {
        let packet = decode(r#"42["led_command",{"command":"on"}]"#).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::Event {
                name: "led_command".to_string(),
                payload: serde_json::json!({"command": "on"}),
            })
        );
    }

    #[test]
    fn decodes_event_with_ack_id_and_namespace() {
        let packet = decode(r#"42/pi,7["camera_command",{"command":"take_photo"}]"#).unwrap();
        let EnginePacket::Message(SocketPacket::Event { name, payload }) = packet else {
            panic!("expected event");
        };
        assert_eq!(name, "camera_command");
        assert_eq!(payload["command"], "take_photo");
    }

    #[test]
    fn event_without_payload_is_null() {
        let packet = decode(r#"42["ping_pi"]"#).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::Event {
                name: "ping_pi".to_string(),
                payload: Value::Null,
            })
        );
    }

    #[test]
    fn decodes_disconnect_and_connect_error() {
        assert_eq!(decode("41").unwrap(), EnginePacket::Message(SocketPacket::Disconnect));
        let packet = decode(r#"44{"message":"Not authorized"}"#).unwrap();
        assert!(matches!(packet, EnginePacket::Message(SocketPacket::ConnectError(_))));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(decode("").is_err());
        assert!(decode("9").is_err());
        assert!(decode("42not-json").is_err());
        assert!(decode("42[1,2]").is_err());
    }

    #[test]
    fn encodes_event() {
        let frame = encode_event("led_status", &serde_json::json!({"status": "on"})).unwrap();
        assert_eq!(frame, r#"42["led_status",{"status":"on"}]"#);
    }

    #[test]
    fn rewrites_endpoints() {
        assert_eq!(
            socket_url("https://example.test").unwrap().as_str(),
            "wss://example.test/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            socket_url("http://localhost:3001/").unwrap().as_str(),
            "ws://localhost:3001/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            socket_url("wss://example.test").unwrap().as_str(),
            "wss://example.test/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!(matches!(socket_url("not a url"), Err(Error::Url(_))));
        assert!(matches!(socket_url("ftp://example.test"), Err(Error::Config(_))));
    }
}
