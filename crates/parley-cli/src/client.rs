//! HTTP client for the gateway REST API.
//!
//! [`GatewayClient`] backs three narrow contracts the conversation view
//! depends on: session creation and preferences ([`SessionBackend`]),
//! history ([`HistoryClient`]) and uploads ([`UploadClient`]).

use std::sync::Arc;

use async_trait::async_trait;
use parley_auth::TokenProvider;
use parley_control::{ControlError, SessionBackend, SessionInfo, SessionPreferences};
use parley_core::{Message, SessionId};
use reqwest::Client;

use crate::config::ClientConfig;
use crate::types::{
    ApiErrorResponse, CreateSessionRequest, CreateSessionResponse, FileUpload, HistoryResponse,
    UploadResponse,
};

/// Error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the body.
        message: String,
    },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Fetches the stored messages of a session.
#[async_trait]
pub trait HistoryClient: Send + Sync {
    /// Fetch every message of a session.
    ///
    /// # Errors
    ///
    /// Returns a `ClientError` if the request fails.
    async fn fetch_history(&self, session_id: &SessionId) -> Result<Vec<Message>, ClientError>;
}

/// Uploads files for use as conversation context.
#[async_trait]
pub trait UploadClient: Send + Sync {
    /// Upload a file. The backend may assign a session if none is given.
    ///
    /// # Errors
    ///
    /// Returns a `ClientError` if the request fails.
    async fn upload_file(
        &self,
        session_id: Option<&SessionId>,
        agent_name: &str,
        file: FileUpload,
    ) -> Result<UploadResponse, ClientError>;
}

/// Client for the gateway REST API.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl GatewayClient {
    /// Create a new gateway client.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base().to_string(),
            tokens,
        })
    }

    /// Handle API error responses.
    async fn handle_error(response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();
        let message = match response.json::<ApiErrorResponse>().await {
            Ok(err) => err.error,
            Err(_) => "Unknown error".to_string(),
        };
        ClientError::Api { status, message }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::handle_error(response).await)
        }
    }

    // =========================================================================
    // Session Operations
    // =========================================================================

    /// Create a new session for an agent.
    ///
    /// # Errors
    ///
    /// Returns a `ClientError` if the request fails.
    pub async fn create_session(&self, agent_name: &str) -> Result<SessionInfo, ClientError> {
        let url = format!("{}/v1/sessions", self.base_url);
        let request = CreateSessionRequest {
            agent_name: agent_name.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.tokens.token())
            .json(&request)
            .send()
            .await?;
        let body: CreateSessionResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;

        Ok(body.into())
    }

    /// Replace the retrieval preferences of a session.
    ///
    /// # Errors
    ///
    /// Returns a `ClientError` if the request fails.
    pub async fn put_preferences(
        &self,
        session_id: &SessionId,
        preferences: &SessionPreferences,
    ) -> Result<(), ClientError> {
        let url = format!("{}/v1/sessions/{}/preferences", self.base_url, session_id);

        let response = self
            .client
            .put(&url)
            .bearer_auth(self.tokens.token())
            .json(preferences)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// List the messages of a session.
    ///
    /// # Errors
    ///
    /// Returns a `ClientError` if the request fails.
    pub async fn list_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, ClientError> {
        let url = format!("{}/v1/sessions/{}/messages", self.base_url, session_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.tokens.token())
            .send()
            .await?;
        let body: HistoryResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;

        Ok(body.messages)
    }

    // =========================================================================
    // File Operations
    // =========================================================================

    /// Upload a file as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns a `ClientError` if the request fails.
    pub async fn post_file(
        &self,
        session_id: Option<&SessionId>,
        agent_name: &str,
        file: FileUpload,
    ) -> Result<UploadResponse, ClientError> {
        let url = format!("{}/v1/files", self.base_url);
        let mut query = vec![("agent_name", agent_name), ("file_name", file.name.as_str())];
        if let Some(id) = session_id {
            query.push(("session_id", id.as_str()));
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.tokens.token())
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(file.bytes)
            .send()
            .await?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionBackend for GatewayClient {
    async fn create_session(&self, agent_name: &str) -> parley_control::Result<SessionInfo> {
        Self::create_session(self, agent_name)
            .await
            .map_err(|e| ControlError::CreateFailed(e.to_string()))
    }

    async fn save_preferences(
        &self,
        session_id: &SessionId,
        preferences: &SessionPreferences,
    ) -> parley_control::Result<()> {
        self.put_preferences(session_id, preferences)
            .await
            .map_err(|e| ControlError::Backend(e.to_string()))
    }
}

#[async_trait]
impl HistoryClient for GatewayClient {
    async fn fetch_history(&self, session_id: &SessionId) -> Result<Vec<Message>, ClientError> {
        self.list_messages(session_id).await
    }
}

#[async_trait]
impl UploadClient for GatewayClient {
    async fn upload_file(
        &self,
        session_id: Option<&SessionId>,
        agent_name: &str,
        file: FileUpload,
    ) -> Result<UploadResponse, ClientError> {
        self.post_file(session_id, agent_name, file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_auth::StaticTokenProvider;
    use parley_control::SearchPolicy;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GatewayClient {
        let config = ClientConfig {
            gateway_url: server.uri(),
            ..ClientConfig::default()
        };
        GatewayClient::new(&config, Arc::new(StaticTokenProvider::new("tok"))).unwrap()
    }

    fn sid(s: &str) -> SessionId {
        SessionId::new(s).unwrap()
    }

    #[tokio::test]
    async fn create_session_posts_agent_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(json!({"agent_name": "helper"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "session_id": "s1",
                "updated_at": "2024-05-01T10:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let info = client_for(&server).create_session("helper").await.unwrap();
        assert_eq!(info.id, sid("s1"));
        assert!(info.updated_at.is_some());
    }

    #[tokio::test]
    async fn api_error_body_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "error": "agent pool exhausted",
                "code": "UNAVAILABLE"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).create_session("helper").await.unwrap_err();
        match err {
            ClientError::Api { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "agent pool exhausted");
            }
            other => panic!("Expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn backend_maps_failures_to_control_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let backend: Arc<dyn SessionBackend> = Arc::new(client_for(&server));
        let err = backend.create_session("helper").await.unwrap_err();
        assert!(matches!(err, ControlError::CreateFailed(_)));
    }

    #[tokio::test]
    async fn save_preferences_puts_json() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/sessions/s1/preferences"))
            .and(body_json(json!({
                "libraries": ["wiki"],
                "search_policy": "always"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let prefs = SessionPreferences {
            libraries: vec!["wiki".into()],
            search_policy: SearchPolicy::Always,
        };
        SessionBackend::save_preferences(&client_for(&server), &sid("s1"), &prefs)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fetch_history_returns_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sessions/s1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{
                    "session_id": "s1",
                    "exchange_id": "e1",
                    "rank": 0,
                    "role": "user",
                    "channel": "final",
                    "parts": [{"type": "text", "text": "hello"}]
                }]
            })))
            .mount(&server)
            .await;

        let messages = client_for(&server).fetch_history(&sid("s1")).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "hello");
    }

    #[tokio::test]
    async fn upload_sends_raw_body_with_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/files"))
            .and(query_param("agent_name", "helper"))
            .and(query_param("file_name", "notes.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "file_id": "f1",
                "session_id": "s5"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let file = FileUpload {
            name: "notes.txt".into(),
            bytes: b"remember the milk".to_vec(),
        };
        let response = client_for(&server)
            .upload_file(None, "helper", file)
            .await
            .unwrap();
        assert_eq!(response.file_id, "f1");
        assert_eq!(response.session_id, Some(sid("s5")));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].body, b"remember the milk");
    }
}
