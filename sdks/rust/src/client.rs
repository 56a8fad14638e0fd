//! HTTP client for interacting with the server.

use reqwest::{RequestBuilder, StatusCode};
use url::Url;

use crate::{
    error::{Error, Result},
    retry::RetryPolicy,
    types::*,
};

/// Header identifying this client instance to the server.
pub const CLIENT_INSTANCE_HEADER: &str = "X-Client-Instance";

/// HTTP client for the API.
///
/// Each client carries a stable instance id, sent as `X-Client-Instance`, so
/// the server can tell this session apart from other tabs or devices of the
/// same user.
///
/// # Example
///
/// ```rust,no_run
/// use chat_guard_sdk::Client;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::new("http://localhost:5000")?.with_token("eyJ...");
///
/// let chat = client.chats().create(Some("Trip planning")).await?;
/// let exchange = client.chats().send_message(&chat.id, "Hello!").await?;
/// println!("{}", exchange.assistant_message.content);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
    http: reqwest::Client,
    token: Option<String>,
    instance_id: String,
    retry: RetryPolicy,
}

impl Client {
    /// Create a new client with a fresh instance id.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the server (e.g., "http://localhost:5000")
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Create a new client with a custom reqwest client.
    pub fn with_client(base_url: impl AsRef<str>, http: reqwest::Client) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        Ok(Self {
            base_url,
            http,
            token: None,
            instance_id: uuid::Uuid::new_v4().to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// Authenticate requests with a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Reuse a persisted instance id, e.g. one stored for the browser session.
    #[must_use]
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    // ─────────────────────────────────────────────────────────────────────────
    // API Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Access the Conversations API.
    pub fn chats(&self) -> ChatsApi<'_> {
        ChatsApi { client: self }
    }

    /// Access the profile and settings API.
    pub fn account(&self) -> AccountApi<'_> {
        AccountApi { client: self }
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<serde_json::Value> {
        let response = self.http.get(self.url("/health")).send().await?;
        Self::handle_response(response).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn url(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .unwrap_or_else(|_| self.base_url.clone())
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let rb = self
            .http
            .request(method, self.url(path))
            .header(CLIENT_INSTANCE_HEADER, &self.instance_id);
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            Err(Error::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

// =============================================================================
// Conversations API
// =============================================================================

/// Conversations API client.
#[derive(Debug)]
pub struct ChatsApi<'a> {
    client: &'a Client,
}

impl ChatsApi<'_> {
    /// List conversations, most recently updated first.
    pub async fn list(&self) -> Result<Vec<Conversation>> {
        let response = self
            .client
            .request(reqwest::Method::GET, "/api/chats")
            .send()
            .await?;
        Ok(Client::handle_response::<ChatList>(response).await?.chats)
    }

    /// Create a conversation; the server titles it "New Chat" when `title` is `None`.
    pub async fn create(&self, title: Option<&str>) -> Result<Conversation> {
        let response = self
            .client
            .request(reqwest::Method::POST, "/api/chats")
            .json(&TitleRequest { title })
            .send()
            .await?;
        Ok(Client::handle_response::<ChatEnvelope>(response).await?.chat)
    }

    pub async fn get(&self, chat_id: &str) -> Result<ConversationDetail> {
        let response = self
            .client
            .request(reqwest::Method::GET, &format!("/api/chats/{chat_id}"))
            .send()
            .await?;
        Client::handle_response(response).await
    }

    pub async fn rename(&self, chat_id: &str, title: &str) -> Result<Conversation> {
        let response = self
            .client
            .request(reqwest::Method::PUT, &format!("/api/chats/{chat_id}"))
            .json(&TitleRequest { title: Some(title) })
            .send()
            .await?;
        Ok(Client::handle_response::<ChatEnvelope>(response).await?.chat)
    }

    pub async fn delete(&self, chat_id: &str) -> Result<()> {
        let response = self
            .client
            .request(reqwest::Method::DELETE, &format!("/api/chats/{chat_id}"))
            .send()
            .await?;
        Client::handle_response::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// Send a message and wait for the reply.
    ///
    /// While another session holds the conversation the server answers 409;
    /// this waits per the client's [`RetryPolicy`] and tries again, returning
    /// [`Error::Busy`] once the retries are spent. Other errors are returned
    /// immediately.
    pub async fn send_message(&self, chat_id: &str, content: &str) -> Result<MessageExchange> {
        let path = format!("/api/chats/{chat_id}/messages");
        let policy = self.client.retry;
        let mut retry = 0;

        loop {
            let response = self
                .client
                .request(reqwest::Method::POST, &path)
                .json(&SendMessageRequest { content })
                .send()
                .await?;

            if response.status() != StatusCode::CONFLICT {
                return Client::handle_response(response).await;
            }

            let Some(delay) = policy.delay(retry) else {
                return Err(Error::Busy { attempts: retry + 1 });
            };
            tracing::debug!(
                chat_id,
                retry = retry + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Conversation busy, retrying"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

// =============================================================================
// Account API
// =============================================================================

/// Profile and settings API client.
#[derive(Debug)]
pub struct AccountApi<'a> {
    client: &'a Client,
}

impl AccountApi<'_> {
    pub async fn profile(&self) -> Result<Profile> {
        let response = self
            .client
            .request(reqwest::Method::GET, "/api/users/profile")
            .send()
            .await?;
        Ok(Client::handle_response::<ProfileEnvelope>(response).await?.profile)
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile> {
        let response = self
            .client
            .request(reqwest::Method::PUT, "/api/users/profile")
            .json(update)
            .send()
            .await?;
        Ok(Client::handle_response::<ProfileEnvelope>(response).await?.profile)
    }

    pub async fn settings(&self) -> Result<Settings> {
        let response = self
            .client
            .request(reqwest::Method::GET, "/api/settings")
            .send()
            .await?;
        Ok(Client::handle_response::<SettingsEnvelope>(response).await?.settings)
    }

    pub async fn update_settings(&self, update: &SettingsUpdate) -> Result<Settings> {
        let response = self
            .client
            .request(reqwest::Method::PUT, "/api/settings")
            .json(update)
            .send()
            .await?;
        Ok(Client::handle_response::<SettingsEnvelope>(response).await?.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::post,
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fake server answering 409 for the first `busy_for` sends.
    #[derive(Clone)]
    struct Fake {
        busy_for: u32,
        calls: Arc<AtomicU32>,
    }

    async fn fake_send(
        State(fake): State<Fake>,
        Path(chat_id): Path<String>,
        headers: HeaderMap,
    ) -> impl IntoResponse {
        assert!(headers.contains_key("x-client-instance"));
        assert_eq!(headers["authorization"], "Bearer token");

        let call = fake.calls.fetch_add(1, Ordering::SeqCst);
        if call < fake.busy_for {
            return (
                StatusCode::CONFLICT,
                Json(json!({ "error": "busy", "retryable": true })),
            )
                .into_response();
        }
        let message = |id: &str, role: &str, content: &str| {
            json!({
                "id": id, "chat_id": chat_id, "role": role,
                "content": content, "created_at": "2026-01-01T00:00:00Z"
            })
        };
        Json(json!({
            "userMessage": message("m1", "user", "hi"),
            "assistantMessage": message("m2", "assistant", "hello"),
        }))
        .into_response()
    }

    async fn spawn(busy_for: u32) -> (String, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let app = Router::new()
            .route("/api/chats/{chat_id}/messages", post(fake_send))
            .with_state(Fake {
                busy_for,
                calls: calls.clone(),
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), calls)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(5),
            multiplier: 1.5,
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn test_send_retries_while_busy() {
        let (url, calls) = spawn(2).await;
        let client = Client::new(&url)
            .unwrap()
            .with_token("token")
            .with_retry_policy(fast_policy());

        let exchange = tokio_test::assert_ok!(client.chats().send_message("c1", "hi").await);
        assert_eq!(exchange.assistant_message.content, "hello");
        assert_eq!(exchange.user_message.chat_id, "c1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_send_gives_up_after_max_retries() {
        let (url, calls) = spawn(u32::MAX).await;
        let client = Client::new(&url)
            .unwrap()
            .with_token("token")
            .with_retry_policy(fast_policy());

        let err = client.chats().send_message("c1", "hi").await.unwrap_err();
        assert!(matches!(err, Error::Busy { attempts: 4 }), "{err:?}");
        assert_eq!(err.status(), Some(409));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_errors_carry_server_message() {
        let (url, _) = spawn(0).await;
        let client = Client::new(&url).unwrap().with_token("token");

        // No such route on the fake server.
        let err = client.chats().list().await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_instance_id_is_stable_per_client() {
        let client = Client::new("http://localhost:5000").unwrap();
        let clone = client.clone();
        assert_eq!(client.instance_id(), clone.instance_id());
        assert_ne!(
            client.instance_id(),
            Client::new("http://localhost:5000").unwrap().instance_id()
        );
        let pinned = client.with_instance_id("tab-1");
        assert_eq!(pinned.instance_id(), "tab-1");
    }
}
