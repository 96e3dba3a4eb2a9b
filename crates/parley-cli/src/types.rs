//! Wire types for the conversation stream and the gateway REST API.

use chrono::{DateTime, Utc};
use parley_control::{SearchPolicy, SessionInfo};
use parley_core::{ClientExchangeId, Message, SessionId};
use serde::{Deserialize, Serialize};

// =============================================================================
// Stream Frames
// =============================================================================

/// A frame received from the conversation stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// A partial, possibly repeated, version of a message.
    Stream {
        /// The message as it stands so far.
        message: Message,
    },
    /// The authoritative messages of a completed exchange.
    Final {
        /// Every message the exchange produced.
        #[serde(default)]
        messages: Vec<Message>,
        /// The session the exchange belongs to.
        #[serde(default)]
        session: Option<SessionInfo>,
    },
    /// An application-level error; the channel stays usable.
    Error {
        /// Human-readable description.
        content: String,
    },
}

impl InboundFrame {
    const KNOWN_TYPES: [&'static str; 3] = ["stream", "final", "error"];
}

/// Outcome of parsing one text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    /// A well-formed frame of a known type.
    Frame(InboundFrame),
    /// Well-formed JSON with a `type` this client does not handle.
    Unrecognized(String),
    /// Not JSON, no `type`, or a known type with an invalid shape.
    Malformed(String),
}

/// Parse a text frame from the conversation stream.
///
/// Unknown frame types are reported separately from malformed frames: the
/// former are tolerated, the latter end the connection.
#[must_use]
pub fn parse_inbound(text: &str) -> ParsedFrame {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return ParsedFrame::Malformed(e.to_string()),
    };

    let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
        return ParsedFrame::Malformed("frame has no \"type\" field".to_string());
    };
    if !InboundFrame::KNOWN_TYPES.contains(&kind) {
        return ParsedFrame::Unrecognized(kind.to_string());
    }

    match serde_json::from_value(value) {
        Ok(frame) => ParsedFrame::Frame(frame),
        Err(e) => ParsedFrame::Malformed(e.to_string()),
    }
}

/// Retrieval context attached to an outbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeContext {
    /// Libraries to search.
    pub libraries: Vec<String>,
    /// Search policy, omitted when the backend default applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_policy: Option<SearchPolicy>,
    /// Uploaded files to include.
    pub file_ids: Vec<String>,
}

impl RuntimeContext {
    /// Whether the context carries nothing worth sending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty() && self.search_policy.is_none() && self.file_ids.is_empty()
    }
}

/// A user request sent over the conversation stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundFrame {
    /// The user's text.
    pub message: String,
    /// Agent to address.
    pub agent_name: String,
    /// Session the request belongs to.
    pub session_id: SessionId,
    /// Optional retrieval context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_context: Option<RuntimeContext>,
    /// Client-generated request ID.
    pub client_exchange_id: ClientExchangeId,
}

// =============================================================================
// Gateway REST Types
// =============================================================================

/// Request to create a session.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    /// Agent the session is for.
    pub agent_name: String,
}

/// Response from session creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionResponse {
    /// The new session ID.
    pub session_id: SessionId,
    /// Last update timestamp.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<CreateSessionResponse> for SessionInfo {
    fn from(response: CreateSessionResponse) -> Self {
        Self {
            id: response.session_id,
            updated_at: response.updated_at,
        }
    }
}

/// Response from the history endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryResponse {
    /// Messages of the session, in any order.
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Response from the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadResponse {
    /// Backend file ID.
    pub file_id: String,
    /// Session the backend attached the file to, if it assigned one.
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// A file to upload.
#[derive(Debug, Clone)]
pub struct FileUpload {
    /// File name reported to the backend.
    pub name: String,
    /// Raw contents.
    pub bytes: Vec<u8>,
}

/// API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Error message.
    pub error: String,
    /// Optional error code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
