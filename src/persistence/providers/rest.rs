//! PostgREST-compatible store, as exposed by hosted Postgres providers.
//!
//! Tables: `chats`, `messages`, `profiles`, `settings`. Rows are exchanged as
//! JSON arrays; writes request `Prefer: return=representation`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::CollaboratorError;
use crate::persistence::{
    AccountStore, Conversation, ConversationStore, MessageRole, Profile, ProfileUpdate, Settings,
    SettingsUpdate, StoredMessage,
};

const SERVICE: &str = "store";

#[derive(Clone)]
pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for RestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStore")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

impl RestStore {
    pub fn new(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, timeout, &e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/rest/v1/{table}", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn write(&self, method: Method, table: &str) -> RequestBuilder {
        self.request(method, table)
            .header("Prefer", "return=representation")
    }

    async fn rows<T: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<Vec<T>, CollaboratorError> {
        let resp = rb
            .send()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, self.timeout, &e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CollaboratorError::Credential { service: SERVICE });
        }
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Store request failed");
            return Err(CollaboratorError::Status {
                service: SERVICE,
                status: status.as_u16(),
            });
        }

        resp.json::<Vec<T>>()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, self.timeout, &e))
    }

    async fn first<T: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<Option<T>, CollaboratorError> {
        Ok(self.rows(rb).await?.into_iter().next())
    }

    async fn single<T: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<T, CollaboratorError> {
        self.first(rb).await?.ok_or(CollaboratorError::Malformed {
            service: SERVICE,
            reason: "write returned no rows".to_string(),
        })
    }

    async fn execute(&self, rb: RequestBuilder) -> Result<(), CollaboratorError> {
        self.rows::<serde_json::Value>(rb).await.map(|_| ())
    }
}

#[async_trait]
impl ConversationStore for RestStore {
    async fn list_conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, CollaboratorError> {
        self.rows(
            self.request(Method::GET, "chats")
                .query(&[("user_id", eq(user_id)), ("order", "updated_at.desc".into())]),
        )
        .await
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
    ) -> Result<Conversation, CollaboratorError> {
        self.single(
            self.write(Method::POST, "chats")
                .json(&json!([{ "user_id": user_id, "title": title }])),
        )
        .await
    }

    async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, CollaboratorError> {
        self.first(self.request(Method::GET, "chats").query(&[
            ("id", eq(conversation_id)),
            ("user_id", eq(user_id)),
            ("limit", "1".into()),
        ]))
        .await
    }

    async fn update_title(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<Option<Conversation>, CollaboratorError> {
        self.first(
            self.write(Method::PATCH, "chats")
                .query(&[("id", eq(conversation_id)), ("user_id", eq(user_id))])
                .json(&json!({ "title": title })),
        )
        .await
    }

    async fn touch_conversation(&self, conversation_id: &str) -> Result<(), CollaboratorError> {
        self.execute(
            self.write(Method::PATCH, "chats")
                .query(&[("id", eq(conversation_id))])
                .json(&json!({ "updated_at": Utc::now() })),
        )
        .await
    }

    async fn delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<(), CollaboratorError> {
        self.execute(
            self.write(Method::DELETE, "chats")
                .query(&[("id", eq(conversation_id)), ("user_id", eq(user_id))]),
        )
        .await
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<StoredMessage, CollaboratorError> {
        self.single(self.write(Method::POST, "messages").json(&json!([{
            "chat_id": conversation_id,
            "role": role,
            "content": content,
        }])))
        .await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, CollaboratorError> {
        self.rows(self.request(Method::GET, "messages").query(&[
            ("chat_id", eq(conversation_id)),
            ("order", "created_at.asc".into()),
        ]))
        .await
    }
}

#[async_trait]
impl AccountStore for RestStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, CollaboratorError> {
        self.first(
            self.request(Method::GET, "profiles")
                .query(&[("id", eq(user_id)), ("limit", "1".into())]),
        )
        .await
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<Profile>, CollaboratorError> {
        self.first(
            self.write(Method::PATCH, "profiles")
                .query(&[("id", eq(user_id))])
                .json(&json!({
                    "full_name": update.full_name,
                    "avatar_url": update.avatar_url,
                    "updated_at": Utc::now(),
                })),
        )
        .await
    }

    async fn get_or_create_settings(&self, user_id: &str) -> Result<Settings, CollaboratorError> {
        let existing = self
            .first(
                self.request(Method::GET, "settings")
                    .query(&[("user_id", eq(user_id)), ("limit", "1".into())]),
            )
            .await?;
        if let Some(settings) = existing {
            return Ok(settings);
        }

        tracing::debug!(user_id, "Creating default settings");
        self.single(
            self.write(Method::POST, "settings")
                .json(&json!([{ "user_id": user_id }])),
        )
        .await
    }

    async fn update_settings(
        &self,
        user_id: &str,
        update: &SettingsUpdate,
    ) -> Result<Settings, CollaboratorError> {
        let mut row = serde_json::to_value(update).map_err(|e| CollaboratorError::Malformed {
            service: SERVICE,
            reason: e.to_string(),
        })?;
        if let Some(obj) = row.as_object_mut() {
            obj.insert("user_id".into(), json!(user_id));
            obj.insert("updated_at".into(), json!(Utc::now()));
        }

        // Upsert on the unique user_id column; only the sent columns are merged.
        self.single(
            self.request(Method::POST, "settings")
                .header("Prefer", "resolution=merge-duplicates,return=representation")
                .query(&[("on_conflict", "user_id")])
                .json(&json!([row])),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_targets_rest_endpoint() {
        let store = RestStore::new("https://db.example.com/", "service-key", Duration::from_secs(5))
            .unwrap();
        let req = store
            .request(Method::GET, "chats")
            .query(&[("user_id", eq("u1"))])
            .build()
            .unwrap();

        assert_eq!(
            req.url().as_str(),
            "https://db.example.com/rest/v1/chats?user_id=eq.u1"
        );
        assert_eq!(req.headers()["apikey"], "service-key");
        assert_eq!(req.headers()["authorization"], "Bearer service-key");
    }

    #[test]
    fn test_debug_hides_key() {
        let store =
            RestStore::new("https://db.example.com", "service-key", Duration::from_secs(5)).unwrap();
        assert!(!format!("{store:?}").contains("service-key"));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_retryable() {
        let store =
            RestStore::new("http://127.0.0.1:1", "k", Duration::from_secs(2)).unwrap();
        let err = store.list_conversations("u1").await.unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }
}
