//! Conversation stream channel over WebSocket.
//!
//! A [`Channel`] owns at most one live connection. Every connection attempt
//! gets a fresh sequence number, and every event the attempt produces carries
//! it; [`Channel::accept`] drops events whose sequence is no longer current.
//! That single comparison is what keeps a late connect, a frame that raced a
//! stop, or a close from a replaced connection from touching the view.
//!
//! Endpoint: WS /v1/stream

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::types::{parse_inbound, InboundFrame, OutboundFrame, ParsedFrame};

/// Close code the client sends when the user stops a response.
pub const CLIENT_STOP_CODE: u16 = 4000;
/// Close reason sent with [`CLIENT_STOP_CODE`].
pub const CLIENT_STOP_REASON: &str = "client_stop";
/// Close code sent when the server produced an unparseable frame.
pub const PROTOCOL_ERROR_CODE: u16 = 1002;

const QUEUE_CAPACITY: usize = 64;

/// Error type for channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to connect.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The channel is not open.
    #[error("Channel not ready (state: {0})")]
    NotReady(ChannelState),

    /// Failed to hand a frame to the writer.
    #[error("Send failed: {0}")]
    Send(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Transport
// =============================================================================

/// A frame queued for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A text frame.
    Text(String),
    /// A close frame; the writer stops after sending it.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Something the reader task observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A text frame.
    Text(String),
    /// The connection closed.
    Closed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// A transport error; the connection is unusable.
    Error(String),
}

/// An established connection, split into its two queues.
#[derive(Debug)]
pub struct Connection {
    /// Frames to send.
    pub outgoing: mpsc::Sender<Outgoing>,
    /// Frames and lifecycle notifications received.
    pub incoming: mpsc::Receiver<Incoming>,
}

/// Opens connections to the conversation stream.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`, authenticating with `token`.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Connection` if the handshake fails.
    async fn connect(&self, url: &str, token: &str) -> Result<Connection, ChannelError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str, token: &str) -> Result<Connection, ChannelError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        let (write, read) = ws_stream.split();

        let (outgoing_tx, outgoing_rx) = mpsc::channel::<Outgoing>(QUEUE_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel::<Incoming>(QUEUE_CAPACITY);

        tokio::spawn(ws_writer(write, outgoing_rx));
        tokio::spawn(ws_reader(read, incoming_tx));

        Ok(Connection {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Task that writes outgoing frames.
///
/// Ends after an explicit close or once every sender is dropped.
async fn ws_writer(
    mut write: futures::stream::SplitSink<WsStream, WsMessage>,
    mut rx: mpsc::Receiver<Outgoing>,
) {
    while let Some(outgoing) = rx.recv().await {
        match outgoing {
            Outgoing::Text(text) => {
                if write.send(WsMessage::Text(text)).await.is_err() {
                    return;
                }
            }
            Outgoing::Close { code, reason } => {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                let _ = write.send(WsMessage::Close(Some(frame))).await;
                return;
            }
        }
    }
    let _ = write.close().await;
}

/// Task that reads incoming frames.
async fn ws_reader(mut read: futures::stream::SplitStream<WsStream>, tx: mpsc::Sender<Incoming>) {
    while let Some(result) = read.next().await {
        let incoming = match result {
            Ok(WsMessage::Text(text)) => Incoming::Text(text),
            Ok(WsMessage::Close(frame)) => {
                let (code, reason) = frame.map_or((None, String::new()), |f| {
                    (Some(u16::from(f.code)), f.reason.into_owned())
                });
                let _ = tx.send(Incoming::Closed { code, reason }).await;
                return;
            }
            // Ignore control frames and binary messages
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) | WsMessage::Binary(_)) => {
                continue;
            }
            Err(e) => {
                let _ = tx.send(Incoming::Error(e.to_string())).await;
                return;
            }
        };
        if tx.send(incoming).await.is_err() {
            return;
        }
    }

    let _ = tx
        .send(Incoming::Closed {
            code: None,
            reason: String::new(),
        })
        .await;
}

// =============================================================================
// Channel
// =============================================================================

/// Connection state of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Never connected.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Frames can be sent.
    Open,
    /// The client is closing the connection after a protocol error.
    Closing,
    /// No usable connection.
    Closed,
}

impl ChannelState {
    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event produced by a connection attempt, tagged with its sequence.
#[derive(Debug)]
pub struct ChannelEvent {
    /// Sequence number of the attempt that produced the event.
    pub seq: u64,
    /// What happened.
    pub kind: ChannelEventKind,
}

/// Raw events emitted by a connection attempt.
#[derive(Debug)]
pub enum ChannelEventKind {
    /// The connection is established.
    Opened(mpsc::Sender<Outgoing>),
    /// A well-formed frame arrived.
    Frame(InboundFrame),
    /// A frame of an unknown type arrived.
    Unrecognized(String),
    /// A frame could not be parsed.
    Malformed(String),
    /// Connecting failed or the transport broke.
    Error(String),
    /// The connection closed.
    Closed {
        /// Close code, if any.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// A current-sequence event after the channel applied its state change.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The channel is open.
    Opened,
    /// A frame to reconcile.
    Frame(InboundFrame),
    /// An unknown frame type; the channel stays open.
    Unrecognized(String),
    /// An unparseable frame; the channel is closing.
    Malformed(String),
    /// A transport failure; the channel is closed.
    Error(String),
    /// The server closed the connection.
    Closed {
        /// Close code, if any.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// The conversation's duplex channel.
pub struct Channel {
    connector: Arc<dyn Connector>,
    state: ChannelState,
    seq: u64,
    sender: Option<mpsc::Sender<Outgoing>>,
    events: mpsc::Sender<ChannelEvent>,
}

impl Channel {
    /// Create an idle channel. Events from every attempt arrive on the
    /// returned receiver.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (events, rx) = mpsc::channel(QUEUE_CAPACITY);
        let channel = Self {
            connector,
            state: ChannelState::Idle,
            seq: 0,
            sender: None,
            events,
        };
        (channel, rx)
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ChannelState {
        self.state
    }

    /// Current connection sequence number.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Whether frames can be sent.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Start a connection attempt.
    ///
    /// No-op while open. Any other state starts a fresh attempt that
    /// supersedes the previous one. Returns the attempt's sequence number
    /// if one was started.
    pub fn connect(&mut self, url: &str, token: &str) -> Option<u64> {
        match self.state {
            ChannelState::Open => return None,
            ChannelState::Connecting | ChannelState::Closing | ChannelState::Closed => {
                // Drop the stale connection; its writer closes once unreferenced
                self.sender = None;
            }
            ChannelState::Idle => {}
        }

        self.seq += 1;
        self.state = ChannelState::Connecting;
        let seq = self.seq;
        tracing::debug!(seq, url, "Connecting");

        let connector = self.connector.clone();
        let events = self.events.clone();
        let url = url.to_string();
        let token = token.to_string();
        tokio::spawn(async move {
            run_attempt(connector, seq, url, token, events).await;
        });

        Some(seq)
    }

    /// Queue an outbound frame.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::NotReady` unless the channel is open.
    pub async fn send(&self, frame: &OutboundFrame) -> Result<(), ChannelError> {
        let sender = match (&self.sender, self.state) {
            (Some(sender), ChannelState::Open) => sender,
            (_, state) => return Err(ChannelError::NotReady(state)),
        };
        let json = serde_json::to_string(frame)?;
        sender
            .send(Outgoing::Text(json))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))?;
        tracing::debug!(
            seq = self.seq,
            client_exchange_id = %frame.client_exchange_id,
            "Frame sent"
        );
        Ok(())
    }

    /// Stop the channel on the user's behalf.
    ///
    /// Sends a `client_stop` close, moves to `Closed`, and invalidates the
    /// current sequence so nothing from the stopped attempt is honored.
    /// Returns `false` if there was nothing to stop.
    pub fn stop(&mut self) -> bool {
        if matches!(self.state, ChannelState::Idle | ChannelState::Closed) {
            return false;
        }
        if let Some(sender) = self.sender.take() {
            let _ = sender.try_send(Outgoing::Close {
                code: CLIENT_STOP_CODE,
                reason: CLIENT_STOP_REASON.to_string(),
            });
        }
        tracing::debug!(seq = self.seq, state = %self.state, "Channel stopped by client");
        self.seq += 1;
        self.state = ChannelState::Closed;
        true
    }

    /// Apply an event to the channel state.
    ///
    /// Returns `None` for events from a superseded attempt.
    pub fn accept(&mut self, event: ChannelEvent) -> Option<Dispatch> {
        if event.seq != self.seq {
            tracing::trace!(seq = event.seq, current = self.seq, "Dropping stale channel event");
            if let ChannelEventKind::Opened(sender) = event.kind {
                // A late connect after a stop; tear it down
                let _ = sender.try_send(Outgoing::Close {
                    code: CLIENT_STOP_CODE,
                    reason: CLIENT_STOP_REASON.to_string(),
                });
            }
            return None;
        }

        if self.state == ChannelState::Closing
            && matches!(
                event.kind,
                ChannelEventKind::Frame(_)
                    | ChannelEventKind::Unrecognized(_)
                    | ChannelEventKind::Malformed(_)
            )
        {
            tracing::trace!(seq = event.seq, "Dropping frame received while closing");
            return None;
        }

        let dispatch = match event.kind {
            ChannelEventKind::Opened(sender) => {
                self.sender = Some(sender);
                self.state = ChannelState::Open;
                tracing::info!(seq = self.seq, "Channel open");
                Dispatch::Opened
            }
            ChannelEventKind::Frame(frame) => Dispatch::Frame(frame),
            ChannelEventKind::Unrecognized(kind) => Dispatch::Unrecognized(kind),
            ChannelEventKind::Malformed(reason) => {
                tracing::warn!(seq = self.seq, error = %reason, "Malformed frame, closing channel");
                if let Some(sender) = self.sender.take() {
                    let _ = sender.try_send(Outgoing::Close {
                        code: PROTOCOL_ERROR_CODE,
                        reason: "protocol_error".to_string(),
                    });
                }
                self.state = ChannelState::Closing;
                Dispatch::Malformed(reason)
            }
            ChannelEventKind::Error(reason) => {
                tracing::warn!(seq = self.seq, error = %reason, "Channel error");
                self.sender = None;
                self.state = ChannelState::Closed;
                Dispatch::Error(reason)
            }
            ChannelEventKind::Closed { code, reason } => {
                tracing::info!(seq = self.seq, code = ?code, reason = %reason, "Channel closed");
                self.sender = None;
                self.state = ChannelState::Closed;
                Dispatch::Closed { code, reason }
            }
        };
        Some(dispatch)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// One connection attempt: connect, then pump incoming frames as events.
async fn run_attempt(
    connector: Arc<dyn Connector>,
    seq: u64,
    url: String,
    token: String,
    events: mpsc::Sender<ChannelEvent>,
) {
    let emit = |kind| ChannelEvent { seq, kind };

    let mut connection = match connector.connect(&url, &token).await {
        Ok(connection) => connection,
        Err(e) => {
            let _ = events.send(emit(ChannelEventKind::Error(e.to_string()))).await;
            return;
        }
    };

    if events
        .send(emit(ChannelEventKind::Opened(connection.outgoing)))
        .await
        .is_err()
    {
        return;
    }

    while let Some(incoming) = connection.incoming.recv().await {
        let (kind, last) = match incoming {
            Incoming::Text(text) => match parse_inbound(&text) {
                ParsedFrame::Frame(frame) => (ChannelEventKind::Frame(frame), false),
                ParsedFrame::Unrecognized(kind) => (ChannelEventKind::Unrecognized(kind), false),
                ParsedFrame::Malformed(reason) => {
                    tracing::debug!(seq, error = %reason, text = %text, "Failed to parse frame");
                    (ChannelEventKind::Malformed(reason), false)
                }
            },
            Incoming::Closed { code, reason } => (ChannelEventKind::Closed { code, reason }, true),
            Incoming::Error(reason) => (ChannelEventKind::Error(reason), true),
        };
        if events.send(emit(kind)).await.is_err() || last {
            return;
        }
    }

    // Transport went away without a close frame
    let _ = events
        .send(emit(ChannelEventKind::Closed {
            code: None,
            reason: String::new(),
        }))
        .await;
}

// =============================================================================
// Tests
// =============================================================================
