//! Conversation view state.
//!
//! [`Conversation`] owns everything one conversation needs: the ordered
//! message collection, the draft/session lifecycle, the stream channel and
//! the waiting indicator. It is mutated only from the task that runs the
//! event loop; asynchronous work either runs on spawned tasks that report
//! back through [`ChannelEvent`]s or is awaited in place and re-checked
//! against the view epoch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parley_auth::TokenProvider;
use parley_control::lifecycle::has_session;
use parley_control::{
    BindOutcome, ControlError, Phase, SearchPolicy, SessionBackend, SessionLifecycle,
    WaitingIndicator,
};
use parley_core::{in_scope, merge_authoritative, upsert_one, ClientExchangeId, Message, SessionId};
use tokio::sync::{mpsc, watch};

use crate::client::{HistoryClient, UploadClient};
use crate::config::ClientConfig;
use crate::types::{FileUpload, InboundFrame, OutboundFrame, RuntimeContext};
use crate::ws::{Channel, ChannelEvent, ChannelState, Connector, Dispatch};

// =============================================================================
// Notices
// =============================================================================

/// Severity of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Informational status.
    Info,
    /// Something failed.
    Error,
}

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity.
    pub level: NoticeLevel,
    /// Text to show.
    pub text: String,
}

/// What a channel event did to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event was stale or out of scope.
    Ignored,
    /// State changed; partial content may have been updated.
    Updated,
    /// An exchange completed and its messages are authoritative.
    Finalized,
}

/// Collaborators the conversation talks to.
#[derive(Clone)]
pub struct Services {
    /// Access token source.
    pub tokens: Arc<dyn TokenProvider>,
    /// Session creation and preferences.
    pub sessions: Arc<dyn SessionBackend>,
    /// Message history.
    pub history: Arc<dyn HistoryClient>,
    /// File uploads.
    pub uploads: Arc<dyn UploadClient>,
}

// =============================================================================
// Conversation
// =============================================================================

/// A single conversation view.
pub struct Conversation {
    config: ClientConfig,
    tokens: Arc<dyn TokenProvider>,
    history: Arc<dyn HistoryClient>,
    uploads: Arc<dyn UploadClient>,
    lifecycle: SessionLifecycle,
    channel: Channel,
    waiting: WaitingIndicator,
    messages: Vec<Message>,
    notices: Vec<Notice>,
    /// Uploaded file IDs to attach to the next request.
    pending_files: Vec<String>,
    /// Requests waiting for the channel to open.
    outbox: Vec<OutboundFrame>,
}

impl Conversation {
    /// Create a draft conversation.
    ///
    /// Channel events arrive on the returned receiver and must be fed back
    /// through [`Conversation::handle_channel_event`].
    #[must_use]
    pub fn new(
        config: ClientConfig,
        services: Services,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (channel, events) = Channel::new(connector);
        let conversation = Self {
            waiting: WaitingIndicator::new(config.min_waiting()),
            lifecycle: SessionLifecycle::new(services.sessions),
            tokens: services.tokens,
            history: services.history,
            uploads: services.uploads,
            channel,
            messages: Vec::new(),
            notices: Vec::new(),
            pending_files: Vec::new(),
            outbox: Vec::new(),
            config,
        };
        (conversation, events)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Messages in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The bound session, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.lifecycle.session_id()
    }

    /// The lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// The channel state.
    #[must_use]
    pub const fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Whether the waiting indicator is shown.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiting.is_waiting()
    }

    /// Subscribe to waiting indicator changes.
    #[must_use]
    pub fn waiting_updates(&self) -> watch::Receiver<bool> {
        self.waiting.subscribe()
    }

    /// File IDs that will be attached to the next request.
    #[must_use]
    pub fn pending_files(&self) -> &[String] {
        &self.pending_files
    }

    /// Agent this conversation talks to.
    #[must_use]
    pub fn agent_name(&self) -> &str {
        &self.config.agent_name
    }

    /// Drain accumulated notices.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn set_status(&mut self, text: impl Into<String>) {
        self.notices.push(Notice {
            level: NoticeLevel::Info,
            text: text.into(),
        });
    }

    fn set_error(&mut self, text: impl Into<String>) {
        self.notices.push(Notice {
            level: NoticeLevel::Error,
            text: text.into(),
        });
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Send a user message, creating a session first if needed.
    pub async fn submit(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let session_id = match self
            .lifecycle
            .ensure_session_id(&self.config.agent_name)
            .await
        {
            Ok(id) => id,
            Err(ControlError::Superseded) => {
                tracing::debug!("Conversation switched before session was created");
                return;
            }
            Err(e) => {
                self.set_error(format!("Could not start a session: {e}"));
                return;
            }
        };

        let frame = OutboundFrame {
            message: text.to_string(),
            agent_name: self.config.agent_name.clone(),
            session_id,
            runtime_context: self.take_runtime_context(),
            client_exchange_id: ClientExchangeId::generate(),
        };
        tracing::debug!(
            session_id = %frame.session_id,
            client_exchange_id = %frame.client_exchange_id,
            "Submitting message"
        );

        self.waiting.begin();
        if self.channel.is_open() {
            self.send_frame(&frame).await;
        } else {
            self.outbox.push(frame);
            self.connect().await;
        }
    }

    fn take_runtime_context(&mut self) -> Option<RuntimeContext> {
        let prefs = self.lifecycle.preferences();
        let context = RuntimeContext {
            libraries: prefs.libraries,
            search_policy: (prefs.search_policy != SearchPolicy::default())
                .then_some(prefs.search_policy),
            file_ids: std::mem::take(&mut self.pending_files),
        };
        (!context.is_empty()).then_some(context)
    }

    async fn connect(&mut self) {
        if self.channel.state() == ChannelState::Connecting {
            // Queued frames go out once the pending attempt opens
            return;
        }
        let min_validity = self.config.token_min_validity();
        if !self.tokens.ensure_fresh(min_validity).await {
            tracing::debug!("Token may be stale, connecting anyway");
        }
        let url = self.config.ws_url();
        if let Some(seq) = self.channel.connect(&url, &self.tokens.token()) {
            tracing::debug!(seq, "Connection attempt started");
        }
    }

    async fn send_frame(&mut self, frame: &OutboundFrame) {
        if let Err(e) = self.channel.send(frame).await {
            self.set_error(format!("Message not sent: {e}"));
            self.waiting.end(true);
        }
    }

    /// Stop the current response.
    pub fn stop(&mut self) {
        let stopped = self.channel.stop();
        self.outbox.clear();
        self.waiting.end(true);
        if stopped {
            self.set_status("Stopped");
        }
    }

    // =========================================================================
    // Inbound Events
    // =========================================================================

    /// Apply one channel event to the view.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) -> EventOutcome {
        let Some(dispatch) = self.channel.accept(event) else {
            return EventOutcome::Ignored;
        };

        match dispatch {
            Dispatch::Opened => {
                for frame in std::mem::take(&mut self.outbox) {
                    self.send_frame(&frame).await;
                }
                EventOutcome::Updated
            }
            Dispatch::Frame(InboundFrame::Stream { message }) => {
                let current = self.lifecycle.session_id();
                if !in_scope(current.as_ref(), &message) {
                    tracing::debug!(
                        session_id = %message.session_id,
                        "Dropping streamed message for another session"
                    );
                    return EventOutcome::Ignored;
                }
                self.messages = upsert_one(&self.messages, message);
                EventOutcome::Updated
            }
            Dispatch::Frame(InboundFrame::Final { messages, session }) => {
                self.apply_final(messages, session.map(|s| s.id)).await
            }
            Dispatch::Frame(InboundFrame::Error { content }) => {
                self.set_error(format!("Agent error: {content}"));
                self.waiting.end(false);
                EventOutcome::Updated
            }
            Dispatch::Unrecognized(kind) => {
                tracing::debug!(kind = %kind, "Unrecognized frame type");
                self.set_status(format!("Ignored unsupported frame type '{kind}'"));
                EventOutcome::Updated
            }
            Dispatch::Malformed(reason) => {
                self.set_error(format!("Protocol error, connection closed: {reason}"));
                self.outbox.clear();
                self.waiting.end(true);
                EventOutcome::Updated
            }
            Dispatch::Error(reason) => {
                self.set_error(format!("Connection error: {reason}"));
                self.outbox.clear();
                self.waiting.end(true);
                EventOutcome::Updated
            }
            Dispatch::Closed { code, reason } => {
                if self.waiting.is_waiting() {
                    self.set_error(format!(
                        "Connection closed before the response completed ({})",
                        code.map_or_else(|| "no code".to_string(), |c| format!("{c} {reason}"))
                    ));
                }
                self.outbox.clear();
                self.waiting.end(true);
                EventOutcome::Updated
            }
        }
    }

    async fn apply_final(
        &mut self,
        messages: Vec<Message>,
        session: Option<SessionId>,
    ) -> EventOutcome {
        // Requests are only sent once bound, so a final seen without a
        // session answers a conversation the user already left
        if !has_session(self.lifecycle.phase()) {
            tracing::debug!(
                phase = ?self.lifecycle.phase(),
                "Dropping final frame for a previous conversation"
            );
            return EventOutcome::Ignored;
        }

        if let Some(id) = session {
            if let Err(e) = self.lifecycle.absorb(id).await {
                tracing::debug!(error = %e, "Dropping final frame for another session");
                return EventOutcome::Ignored;
            }
        }

        let current = self.lifecycle.session_id();
        let scoped = messages
            .into_iter()
            .filter(|m| in_scope(current.as_ref(), m));
        self.messages = merge_authoritative(&self.messages, scoped);
        self.waiting.end(false);
        EventOutcome::Finalized
    }

    // =========================================================================
    // Session Switching
    // =========================================================================

    /// Switch to an existing session and load its history.
    pub async fn open_session(&mut self, session_id: SessionId) {
        self.reset_view();
        let epoch = self.lifecycle.switch_to(Some(session_id.clone()));
        self.load_history(&session_id, epoch).await;
    }

    /// Start a fresh draft conversation.
    pub fn new_draft(&mut self) {
        self.reset_view();
        self.lifecycle.switch_to(None);
        self.set_status("New conversation");
    }

    /// Replace the messages with the stored history of the bound session.
    pub async fn reload_history(&mut self) {
        let Some(session_id) = self.lifecycle.session_id() else {
            self.set_status("Nothing to reload: conversation is not saved yet");
            return;
        };
        let epoch = self.lifecycle.epoch();
        self.load_history(&session_id, epoch).await;
    }

    fn reset_view(&mut self) {
        self.messages.clear();
        self.pending_files.clear();
        self.outbox.clear();
        self.waiting.end(true);
    }

    async fn load_history(&mut self, session_id: &SessionId, epoch: u64) {
        match self.history.fetch_history(session_id).await {
            Ok(history) => {
                if self.lifecycle.epoch() != epoch {
                    tracing::debug!(session_id = %session_id, "Dropping history for a previous view");
                    return;
                }
                let scoped = history
                    .into_iter()
                    .filter(|m| in_scope(Some(session_id), m));
                self.messages = merge_authoritative(&[], scoped);
                tracing::debug!(
                    session_id = %session_id,
                    count = self.messages.len(),
                    "History loaded"
                );
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to load history");
                self.set_error(format!("Failed to load history: {e}"));
            }
        }
    }

    // =========================================================================
    // Context
    // =========================================================================

    /// Upload files to attach to the next request.
    ///
    /// Each file is handled independently; a failure is reported and the
    /// remaining files are still uploaded.
    pub async fn attach(&mut self, paths: &[PathBuf]) {
        for path in paths {
            let file = match read_upload(path).await {
                Ok(file) => file,
                Err(e) => {
                    self.set_error(format!("Cannot read {}: {e}", path.display()));
                    continue;
                }
            };
            let name = file.name.clone();
            let session_id = self.lifecycle.session_id();

            match self
                .uploads
                .upload_file(session_id.as_ref(), &self.config.agent_name, file)
                .await
            {
                Ok(response) => {
                    self.pending_files.push(response.file_id);
                    self.set_status(format!("Attached {name}"));
                    if let Some(assigned) = response.session_id {
                        self.absorb_side_session(assigned).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "Upload failed");
                    self.set_error(format!("Upload of {name} failed: {e}"));
                }
            }
        }
    }

    async fn absorb_side_session(&mut self, session_id: SessionId) {
        match self.lifecycle.absorb(session_id).await {
            Ok(BindOutcome::Bound) => self.set_status("Conversation saved"),
            Ok(_) => {}
            Err(e) => self.set_error(e.to_string()),
        }
    }

    /// Add a library to the retrieval context.
    pub async fn select_library(&mut self, library: &str) {
        let library = library.trim().to_string();
        if library.is_empty() {
            return;
        }
        let result = self
            .lifecycle
            .update_preferences(|p| p.select_library(library.clone()))
            .await;
        match result {
            Ok(()) => self.set_status(format!("Library {library} selected")),
            Err(e) => self.set_error(format!("Failed to save preferences: {e}")),
        }
    }

    /// Set the search policy.
    pub async fn set_search_policy(&mut self, policy: SearchPolicy) {
        let result = self
            .lifecycle
            .update_preferences(|p| p.search_policy = policy)
            .await;
        match result {
            Ok(()) => self.set_status(format!("Search policy: {policy}")),
            Err(e) => self.set_error(format!("Failed to save preferences: {e}")),
        }
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("lifecycle", &self.lifecycle)
            .field("channel", &self.channel)
            .field("messages", &self.messages.len())
            .finish_non_exhaustive()
    }
}

async fn read_upload(path: &Path) -> std::io::Result<FileUpload> {
    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned());
    Ok(FileUpload { name, bytes })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use crate::types::UploadResponse;
    use crate::ws::tests::FakeConnector;
    use crate::ws::{Incoming, Outgoing};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use parley_auth::StaticTokenProvider;
    use parley_control::{SessionInfo, SessionPreferences};
    use parley_core::Role;
    use serde_json::json;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeGateway {
        creates: AtomicUsize,
        saved: Mutex<Vec<SessionPreferences>>,
        history: Mutex<Vec<Message>>,
        upload_session: Mutex<Option<SessionId>>,
    }

    #[async_trait]
    impl SessionBackend for FakeGateway {
        async fn create_session(&self, _agent_name: &str) -> parley_control::Result<SessionInfo> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SessionInfo::new(SessionId::new(format!("s{n}")).unwrap()))
        }

        async fn save_preferences(
            &self,
            _session_id: &SessionId,
            preferences: &SessionPreferences,
        ) -> parley_control::Result<()> {
            self.saved.lock().push(preferences.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl HistoryClient for FakeGateway {
        async fn fetch_history(&self, _session_id: &SessionId) -> Result<Vec<Message>, ClientError> {
            Ok(self.history.lock().clone())
        }
    }

    #[async_trait]
    impl UploadClient for FakeGateway {
        async fn upload_file(
            &self,
            _session_id: Option<&SessionId>,
            _agent_name: &str,
            file: FileUpload,
        ) -> Result<UploadResponse, ClientError> {
            Ok(UploadResponse {
                file_id: format!("file-{}", file.name),
                session_id: self.upload_session.lock().clone(),
            })
        }
    }

    struct Harness {
        conversation: Conversation,
        events: mpsc::Receiver<ChannelEvent>,
        connector: Arc<FakeConnector>,
        gateway: Arc<FakeGateway>,
    }

    impl Harness {
        fn new(connector: FakeConnector) -> Self {
            let gateway = Arc::new(FakeGateway::default());
            let connector = Arc::new(connector);
            let services = Services {
                tokens: Arc::new(StaticTokenProvider::new("tok")),
                sessions: gateway.clone(),
                history: gateway.clone(),
                uploads: gateway.clone(),
            };
            let config = ClientConfig {
                agent_name: "helper".to_string(),
                ..ClientConfig::default()
            };
            let (conversation, events) = Conversation::new(config, services, connector.clone());
            Self {
                conversation,
                events,
                connector,
                gateway,
            }
        }

        async fn pump(&mut self) -> EventOutcome {
            let event = self.events.recv().await.unwrap();
            self.conversation.handle_channel_event(event).await
        }
    }

    fn sid(s: &str) -> SessionId {
        SessionId::new(s).unwrap()
    }

    fn frame_message(session: &str, rank: i64, role: &str, text: &str) -> serde_json::Value {
        json!({
            "session_id": session,
            "exchange_id": "e1",
            "rank": rank,
            "role": role,
            "channel": "final",
            "timestamp": "2024-05-01T10:00:00Z",
            "parts": [{"type": "text", "text": text}]
        })
    }

    fn stream(session: &str, text: &str) -> Incoming {
        Incoming::Text(
            json!({"type": "stream", "message": frame_message(session, 0, "assistant", text)})
                .to_string(),
        )
    }

    // =========================================================================
    // Submit & Reconcile
    // =========================================================================

    #[tokio::test]
    async fn submit_creates_session_connects_and_flushes() {
        let mut h = Harness::new(FakeConnector::default());
        h.conversation.submit("hello").await;

        assert_eq!(h.conversation.session_id(), Some(sid("s1")));
        assert_eq!(h.conversation.channel_state(), ChannelState::Connecting);
        assert!(h.conversation.is_waiting());

        assert_eq!(h.pump().await, EventOutcome::Updated);
        assert_eq!(h.conversation.channel_state(), ChannelState::Open);

        let mut peer = h.connector.take_peer();
        let Some(Outgoing::Text(text)) = peer.from_client.recv().await else {
            panic!("Expected outbound text frame");
        };
        let sent: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(sent["message"], "hello");
        assert_eq!(sent["session_id"], "s1");
        assert_eq!(sent["agent_name"], "helper");
        assert!(sent.get("runtime_context").is_none());
    }

    #[tokio::test]
    async fn submits_while_connecting_share_one_attempt() {
        let gate = Arc::new(Notify::new());
        let mut h = Harness::new(FakeConnector {
            gate: Some(gate.clone()),
            ..FakeConnector::default()
        });

        h.conversation.submit("one").await;
        h.conversation.submit("two").await;
        assert_eq!(h.conversation.channel_state(), ChannelState::Connecting);

        gate.notify_one();
        assert_eq!(h.pump().await, EventOutcome::Updated);
        assert_eq!(h.connector.tokens.lock().len(), 1);

        let mut peer = h.connector.take_peer();
        for expected in ["one", "two"] {
            let Some(Outgoing::Text(text)) = peer.from_client.recv().await else {
                panic!("Expected a text frame");
            };
            let sent: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(sent["message"], expected);
        }
    }

    #[tokio::test]
    async fn streamed_then_final_collapses_to_one_message() {
        let mut h = Harness::new(FakeConnector::default());
        h.conversation.submit("hi").await;
        h.pump().await;
        let peer = h.connector.take_peer();

        for text in ["Hel", "Hello", "Hello world"] {
            peer.to_client.send(stream("s1", text)).await.unwrap();
            assert_eq!(h.pump().await, EventOutcome::Updated);
        }
        assert_eq!(h.conversation.messages().len(), 1);
        assert_eq!(h.conversation.messages()[0].text(), "Hello world");

        let final_frame = json!({
            "type": "final",
            "messages": [
                frame_message("s1", -1, "user", "hi"),
                frame_message("s1", 0, "assistant", "Hello world!"),
            ],
            "session": {"id": "s1"}
        });
        peer.to_client
            .send(Incoming::Text(final_frame.to_string()))
            .await
            .unwrap();
        assert_eq!(h.pump().await, EventOutcome::Finalized);

        let messages = h.conversation.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].text(), "Hello world!");
    }

    #[tokio::test]
    async fn stream_for_other_session_is_dropped() {
        let mut h = Harness::new(FakeConnector::default());
        h.conversation.submit("hi").await;
        h.pump().await;
        let peer = h.connector.take_peer();

        peer.to_client.send(stream("elsewhere", "nope")).await.unwrap();
        assert_eq!(h.pump().await, EventOutcome::Ignored);
        assert!(h.conversation.messages().is_empty());
    }

    #[tokio::test]
    async fn error_frame_keeps_channel_open() {
        let mut h = Harness::new(FakeConnector::default());
        h.conversation.submit("hi").await;
        h.pump().await;
        let peer = h.connector.take_peer();

        peer.to_client
            .send(Incoming::Text(r#"{"type":"error","content":"boom"}"#.into()))
            .await
            .unwrap();
        h.pump().await;

        assert_eq!(h.conversation.channel_state(), ChannelState::Open);
        let notices = h.conversation.take_notices();
        assert!(notices
            .iter()
            .any(|n| n.level == NoticeLevel::Error && n.text.contains("boom")));
    }

    #[tokio::test]
    async fn malformed_frame_preserves_messages_and_session() {
        let mut h = Harness::new(FakeConnector::default());
        h.conversation.submit("hi").await;
        h.pump().await;
        let peer = h.connector.take_peer();

        peer.to_client.send(stream("s1", "partial")).await.unwrap();
        h.pump().await;
        peer.to_client.send(Incoming::Text("{oops".into())).await.unwrap();
        h.pump().await;

        assert_eq!(h.conversation.channel_state(), ChannelState::Closing);
        assert!(!h.conversation.is_waiting());

        peer.to_client
            .send(Incoming::Closed {
                code: Some(1002),
                reason: "protocol_error".into(),
            })
            .await
            .unwrap();
        h.pump().await;

        assert_eq!(h.conversation.channel_state(), ChannelState::Closed);
        assert_eq!(h.conversation.messages().len(), 1);
        assert_eq!(h.conversation.session_id(), Some(sid("s1")));
        let notices = h.conversation.take_notices();
        assert_eq!(
            notices
                .iter()
                .filter(|n| n.level == NoticeLevel::Error)
                .count(),
            1
        );
    }

    // =========================================================================
    // Stop
    // =========================================================================

    #[tokio::test]
    async fn stop_while_connecting_suppresses_late_connect() {
        let gate = Arc::new(Notify::new());
        let mut h = Harness::new(FakeConnector {
            gate: Some(gate.clone()),
            ..FakeConnector::default()
        });

        h.conversation.submit("hi").await;
        assert_eq!(h.conversation.channel_state(), ChannelState::Connecting);
        assert!(h.conversation.is_waiting());

        h.conversation.stop();
        assert!(!h.conversation.is_waiting());
        assert_eq!(h.conversation.channel_state(), ChannelState::Closed);

        gate.notify_one();
        assert_eq!(h.pump().await, EventOutcome::Ignored);
        assert_eq!(h.conversation.channel_state(), ChannelState::Closed);
        assert!(h.conversation.messages().is_empty());

        // Nothing queued before the stop leaks onto the late connection
        let mut peer = h.connector.take_peer();
        assert!(matches!(
            peer.from_client.recv().await,
            Some(Outgoing::Close { .. })
        ));
    }

    #[tokio::test]
    async fn stop_on_closed_channel_still_clears_waiting() {
        let mut h = Harness::new(FakeConnector::default());
        h.conversation.stop();
        assert!(!h.conversation.is_waiting());
        assert!(h.conversation.take_notices().is_empty());
    }

    // =========================================================================
    // Session Switching
    // =========================================================================

    #[tokio::test]
    async fn open_session_seeds_history() {
        let mut h = Harness::new(FakeConnector::default());
        let older: Message = serde_json::from_value(frame_message("s9", 0, "user", "q")).unwrap();
        let newer: Message =
            serde_json::from_value(frame_message("s9", 1, "assistant", "a")).unwrap();
        *h.gateway.history.lock() = vec![newer, older];

        h.conversation.open_session(sid("s9")).await;

        assert_eq!(h.conversation.session_id(), Some(sid("s9")));
        let texts: Vec<_> = h.conversation.messages().iter().map(Message::text).collect();
        assert_eq!(texts, vec!["q", "a"]);
    }

    #[tokio::test]
    async fn new_draft_clears_everything() {
        let mut h = Harness::new(FakeConnector::default());
        h.conversation.select_library("wiki").await;
        h.conversation.submit("hi").await;
        h.pump().await;
        let peer = h.connector.take_peer();
        peer.to_client.send(stream("s1", "answer")).await.unwrap();
        h.pump().await;

        h.conversation.new_draft();

        assert_eq!(h.conversation.phase(), Phase::Draft);
        assert!(h.conversation.messages().is_empty());
        assert!(!h.conversation.is_waiting());

        // Frames for the previous session no longer land in the view
        peer.to_client.send(stream("s1", "late")).await.unwrap();
        assert_eq!(h.pump().await, EventOutcome::Ignored);
    }

    #[tokio::test]
    async fn late_final_does_not_bind_new_draft() {
        let mut h = Harness::new(FakeConnector::default());
        h.conversation.submit("hi").await;
        h.pump().await;
        let peer = h.connector.take_peer();

        h.conversation.new_draft();

        let final_frame = json!({
            "type": "final",
            "messages": [frame_message("s1", 0, "assistant", "old answer")],
            "session": {"id": "s1"}
        });
        peer.to_client
            .send(Incoming::Text(final_frame.to_string()))
            .await
            .unwrap();
        assert_eq!(h.pump().await, EventOutcome::Ignored);

        assert_eq!(h.conversation.phase(), Phase::Draft);
        assert_eq!(h.conversation.session_id(), None);
        assert!(h.conversation.messages().is_empty());
    }

    #[tokio::test]
    async fn late_final_for_previous_session_is_dropped_after_switch() {
        let mut h = Harness::new(FakeConnector::default());
        h.conversation.submit("hi").await;
        h.pump().await;
        let peer = h.connector.take_peer();

        h.conversation.open_session(sid("s9")).await;

        let final_frame = json!({
            "type": "final",
            "messages": [frame_message("s1", 0, "assistant", "old answer")],
            "session": {"id": "s1"}
        });
        peer.to_client
            .send(Incoming::Text(final_frame.to_string()))
            .await
            .unwrap();
        assert_eq!(h.pump().await, EventOutcome::Ignored);

        assert_eq!(h.conversation.session_id(), Some(sid("s9")));
        assert!(h.conversation.messages().is_empty());
    }

    #[tokio::test]
    async fn reload_without_session_is_a_notice() {
        let mut h = Harness::new(FakeConnector::default());
        h.conversation.reload_history().await;
        let notices = h.conversation.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Info);
    }

    // =========================================================================
    // Context
    // =========================================================================

    #[tokio::test]
    async fn draft_preferences_ride_along_and_seed_once() {
        let mut h = Harness::new(FakeConnector::default());
        h.conversation.select_library("wiki").await;
        h.conversation.set_search_policy(SearchPolicy::Always).await;
        assert!(h.gateway.saved.lock().is_empty());

        h.conversation.submit("hi").await;
        h.pump().await;
        assert_eq!(h.gateway.saved.lock().len(), 1);

        let mut peer = h.connector.take_peer();
        let Some(Outgoing::Text(text)) = peer.from_client.recv().await else {
            panic!("Expected outbound text frame");
        };
        let sent: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(sent["runtime_context"]["libraries"][0], "wiki");
        assert_eq!(sent["runtime_context"]["search_policy"], "always");
    }

    #[tokio::test]
    async fn attach_continues_past_failures_and_absorbs_session() {
        let mut h = Harness::new(FakeConnector::default());
        *h.gateway.upload_session.lock() = Some(sid("up1"));

        let mut good = tempfile::NamedTempFile::new().unwrap();
        write!(good, "contents").unwrap();
        let missing = PathBuf::from("/nonexistent/parley/missing.txt");

        h.conversation
            .attach(&[missing, good.path().to_path_buf()])
            .await;

        assert_eq!(h.conversation.pending_files().len(), 1);
        assert_eq!(h.conversation.session_id(), Some(sid("up1")));
        assert_eq!(h.gateway.creates.load(Ordering::SeqCst), 0);

        let notices = h.conversation.take_notices();
        assert!(notices.iter().any(|n| n.level == NoticeLevel::Error));
        assert!(notices.iter().any(|n| n.text.starts_with("Attached")));
    }
}
