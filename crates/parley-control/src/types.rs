//! Request and response types for conversation session management.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parley_core::SessionId;
use serde::{Deserialize, Serialize};

/// How the agent should use retrieval for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPolicy {
    /// Let the agent decide when to search.
    #[default]
    Auto,
    /// Search the selected libraries for every turn.
    Always,
    /// Never search.
    Never,
}

impl SearchPolicy {
    /// Wire name of the policy.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Always => "always",
            Self::Never => "never",
        }
    }
}

impl fmt::Display for SearchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "unknown search policy '{other}' (expected auto, always or never)"
            )),
        }
    }
}

/// Retrieval preferences persisted per session on the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPreferences {
    /// Libraries selected as retrieval context.
    #[serde(default)]
    pub libraries: Vec<String>,
    /// Search policy.
    #[serde(default)]
    pub search_policy: SearchPolicy,
}

impl SessionPreferences {
    /// Whether nothing differs from the defaults.
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Add a library, ignoring duplicates.
    pub fn select_library(&mut self, library: impl Into<String>) {
        let library = library.into();
        if !self.libraries.contains(&library) {
            self.libraries.push(library);
        }
    }
}

/// A session as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Backend-assigned session ID.
    #[serde(alias = "session_id")]
    pub id: SessionId,
    /// Last update timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionInfo {
    /// A session with no update timestamp.
    #[must_use]
    pub const fn new(id: SessionId) -> Self {
        Self {
            id,
            updated_at: None,
        }
    }
}
