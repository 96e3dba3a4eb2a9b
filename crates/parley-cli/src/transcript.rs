//! Plain-text transcript output for the line-mode front-end.

use std::collections::HashMap;

use parley_core::{Channel, Message, MessageKey, Role};

/// Tracks which message versions have already been printed.
#[derive(Debug, Default)]
pub struct Transcript {
    printed: HashMap<MessageKey, String>,
}

impl Transcript {
    /// Create an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything printed so far, e.g. after switching conversations.
    pub fn reset(&mut self) {
        self.printed.clear();
    }

    /// Lines for messages that are new or changed since the last call.
    ///
    /// User messages are skipped unless `include_user` is set, since the user
    /// typed them.
    pub fn render(&mut self, messages: &[Message], include_user: bool) -> Vec<String> {
        let mut lines = Vec::new();
        for message in messages {
            if message.role == Role::User && !include_user {
                continue;
            }
            let text = message.text();
            if text.is_empty() {
                continue;
            }
            let key = message.key();
            if self.printed.get(&key) == Some(&text) {
                continue;
            }
            lines.push(format!("{}{text}", prefix(message)));
            self.printed.insert(key, text);
        }
        lines
    }
}

fn prefix(message: &Message) -> String {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
        Role::System => "system",
    };
    match message.channel {
        Channel::Final => format!("{who}> "),
        other => format!("{who} [{}]> ", other.as_str()),
    }
}
