//! Conversation message model and display ordering.
//!
//! A [`Message`] is one unit of conversation content. Its identity is the
//! composite [`MessageKey`]; its display position is given by
//! [`display_order`], which sorts by `rank` and breaks ties with the
//! lexically comparable `timestamp`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::ids::{ExchangeId, SessionId};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human user.
    User,
    /// The assistant / agent.
    Assistant,
    /// A tool invoked by the agent.
    Tool,
    /// System-generated content.
    System,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::System => "system",
        }
    }
}

/// Which logical stream of an exchange a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// The answer shown to the user.
    Final,
    /// A plan the agent announced before acting.
    Plan,
    /// Intermediate reasoning.
    Thought,
    /// What the agent observed after acting.
    Observation,
    /// A tool invocation.
    ToolCall,
    /// The output of a tool invocation.
    ToolResult,
    /// Out-of-band system note.
    SystemNote,
    /// An error reported inside the conversation.
    Error,
}

impl Channel {
    /// Wire name of the channel.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Final => "final",
            Self::Plan => "plan",
            Self::Thought => "thought",
            Self::Observation => "observation",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::SystemNote => "system_note",
            Self::Error => "error",
        }
    }
}

/// A typed content fragment inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// A tool invocation issued by the agent.
    ToolCall {
        /// Invocation ID.
        id: String,
        /// Tool name.
        name: String,
        /// Tool arguments.
        #[serde(default)]
        arguments: serde_json::Value,
    },
    /// The result of a tool invocation.
    ToolResult {
        /// Invocation ID this result answers.
        id: String,
        /// Result payload rendered as text.
        #[serde(default)]
        content: String,
        /// Whether the tool failed.
        #[serde(default)]
        is_error: bool,
    },
    /// A reference to an uploaded file.
    File {
        /// Backend file ID.
        file_id: String,
        /// Original file name, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// A part type this client does not understand.
    #[serde(other)]
    Unsupported,
}

/// Composite identity of a message within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    /// Owning session.
    pub session_id: SessionId,
    /// Exchange the message belongs to.
    pub exchange_id: ExchangeId,
    /// Backend-assigned rank.
    pub rank: i64,
    /// Producer role.
    pub role: Role,
    /// Logical channel.
    pub channel: Channel,
}

/// One unit of conversation content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Owning session.
    pub session_id: SessionId,
    /// Exchange the message belongs to.
    pub exchange_id: ExchangeId,
    /// Primary sort key, assigned by the backend.
    pub rank: i64,
    /// Producer role.
    pub role: Role,
    /// Logical channel.
    pub channel: Channel,
    /// ISO-8601 timestamp; secondary sort key.
    #[serde(default)]
    pub timestamp: String,
    /// Ordered content fragments.
    #[serde(default)]
    pub parts: Vec<Part>,
    /// Free-form metadata (token usage, citations, ...).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    /// Create an empty message with the given identity.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        exchange_id: ExchangeId,
        rank: i64,
        role: Role,
        channel: Channel,
    ) -> Self {
        Self {
            session_id,
            exchange_id,
            rank,
            role,
            channel,
            timestamp: String::new(),
            parts: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Set the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Append a text part.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(Part::Text { text: text.into() });
        self
    }

    /// The composite key identifying this message.
    #[must_use]
    pub fn key(&self) -> MessageKey {
        MessageKey {
            session_id: self.session_id.clone(),
            exchange_id: self.exchange_id.clone(),
            rank: self.rank,
            role: self.role,
            channel: self.channel,
        }
    }

    /// Whether `other` has the same composite key, without allocating.
    #[must_use]
    pub fn same_key(&self, other: &Self) -> bool {
        self.rank == other.rank
            && self.role == other.role
            && self.channel == other.channel
            && self.exchange_id == other.exchange_id
            && self.session_id == other.session_id
    }

    /// Concatenated text of all text parts.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Total display order: `rank` ascending, then `timestamp` lexically ascending.
#[must_use]
pub fn display_order(a: &Message, b: &Message) -> Ordering {
    a.rank
        .cmp(&b.rank)
        .then_with(|| a.timestamp.cmp(&b.timestamp))
}

/// Stable-sort a collection into display order.
///
/// Elements comparing equal keep their relative position, so sorting an
/// already sorted slice leaves it unchanged.
pub fn sort_for_display(messages: &mut [Message]) {
    messages.sort_by(display_order);
}
