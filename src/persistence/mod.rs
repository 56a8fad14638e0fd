//! Durable store collaborator.
//!
//! Records serialize with the store's column names (`user_id`, `created_at`, ...)
//! and are returned to API callers unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

pub mod providers;

pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Profile write. Both fields are always written, `None` clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub user_id: String,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default)]
    pub vapi_api_key: Option<String>,
    #[serde(default)]
    pub raper_url: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Settings {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            theme: None,
            language: None,
            gemini_api_key: None,
            vapi_api_key: None,
            raper_url: None,
            updated_at: None,
        }
    }

    /// Apply the fields present in `update`, leaving the rest untouched.
    pub fn apply(&mut self, update: &SettingsUpdate, now: DateTime<Utc>) {
        let fields = [
            (&mut self.theme, &update.theme),
            (&mut self.language, &update.language),
            (&mut self.gemini_api_key, &update.gemini_api_key),
            (&mut self.vapi_api_key, &update.vapi_api_key),
            (&mut self.raper_url, &update.raper_url),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                *field = Some(value.clone());
            }
        }
        self.updated_at = Some(now);
    }
}

/// Partial settings write. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vapi_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raper_url: Option<String>,
}

/// Conversations and their messages. Every conversation operation is scoped by owner.
#[async_trait]
pub trait ConversationStore: Send + Sync + std::fmt::Debug {
    /// Owned conversations, most recently updated first.
    async fn list_conversations(&self, user_id: &str)
    -> Result<Vec<Conversation>, CollaboratorError>;

    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
    ) -> Result<Conversation, CollaboratorError>;

    /// `None` when the conversation does not exist or belongs to someone else.
    async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, CollaboratorError>;

    async fn update_title(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<Option<Conversation>, CollaboratorError>;

    /// Bump `updated_at`.
    async fn touch_conversation(&self, conversation_id: &str) -> Result<(), CollaboratorError>;

    /// Deleting an absent or foreign conversation is a no-op.
    async fn delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<(), CollaboratorError>;

    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<StoredMessage, CollaboratorError>;

    /// Messages oldest first.
    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, CollaboratorError>;
}

/// Per-user profile and settings records.
#[async_trait]
pub trait AccountStore: Send + Sync + std::fmt::Debug {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, CollaboratorError>;

    async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<Profile>, CollaboratorError>;

    /// Settings row for the user, inserted empty when missing.
    async fn get_or_create_settings(&self, user_id: &str) -> Result<Settings, CollaboratorError>;

    /// Upsert: applies `update` to the existing row or to a new empty one.
    async fn update_settings(
        &self,
        user_id: &str,
        update: &SettingsUpdate,
    ) -> Result<Settings, CollaboratorError>;
}
