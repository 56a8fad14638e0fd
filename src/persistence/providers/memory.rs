use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::CollaboratorError;
use crate::persistence::{
    AccountStore, Conversation, ConversationStore, MessageRole, Profile, ProfileUpdate, Settings,
    SettingsUpdate, StoredMessage,
};

/// Process-local store for development and tests. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: DashMap<String, Conversation>,
    messages: DashMap<String, Vec<StoredMessage>>,
    profiles: DashMap<String, Profile>,
    settings: DashMap<String, Settings>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profiles are provisioned by the identity provider; this stands in for sign-up.
    pub fn insert_profile(&self, profile: Profile) {
        self.profiles.insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn list_conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, CollaboratorError> {
        let mut chats: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.value().clone())
            .collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
    ) -> Result<Conversation, CollaboratorError> {
        let now = Utc::now();
        let chat = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.conversations.insert(chat.id.clone(), chat.clone());
        Ok(chat)
    }

    async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, CollaboratorError> {
        Ok(self
            .conversations
            .get(conversation_id)
            .filter(|c| c.user_id == user_id)
            .map(|c| c.value().clone()))
    }

    async fn update_title(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<Option<Conversation>, CollaboratorError> {
        let Some(mut chat) = self
            .conversations
            .get_mut(conversation_id)
            .filter(|c| c.user_id == user_id)
        else {
            return Ok(None);
        };
        chat.title = title.to_string();
        Ok(Some(chat.clone()))
    }

    async fn touch_conversation(&self, conversation_id: &str) -> Result<(), CollaboratorError> {
        if let Some(mut chat) = self.conversations.get_mut(conversation_id) {
            chat.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<(), CollaboratorError> {
        if self
            .conversations
            .remove_if(conversation_id, |_, c| c.user_id == user_id)
            .is_some()
        {
            self.messages.remove(conversation_id);
        }
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<StoredMessage, CollaboratorError> {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            chat_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, CollaboratorError> {
        // Insertion order is creation order.
        Ok(self
            .messages
            .get(conversation_id)
            .map(|m| m.value().clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, CollaboratorError> {
        Ok(self.profiles.get(user_id).map(|p| p.value().clone()))
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<Profile>, CollaboratorError> {
        let Some(mut profile) = self.profiles.get_mut(user_id) else {
            return Ok(None);
        };
        profile.full_name.clone_from(&update.full_name);
        profile.avatar_url.clone_from(&update.avatar_url);
        profile.updated_at = Some(Utc::now());
        Ok(Some(profile.clone()))
    }

    async fn get_or_create_settings(&self, user_id: &str) -> Result<Settings, CollaboratorError> {
        Ok(self
            .settings
            .entry(user_id.to_string())
            .or_insert_with(|| Settings::empty(user_id))
            .clone())
    }

    async fn update_settings(
        &self,
        user_id: &str,
        update: &SettingsUpdate,
    ) -> Result<Settings, CollaboratorError> {
        let mut settings = self
            .settings
            .entry(user_id.to_string())
            .or_insert_with(|| Settings::empty(user_id));
        settings.apply(update, Utc::now());
        Ok(settings.clone())
    }
}
