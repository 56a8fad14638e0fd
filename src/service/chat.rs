use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::AppError;
use crate::llm::{ChatTurn, CompletionClient};
use crate::persistence::{
    Conversation, ConversationStore, DEFAULT_CHAT_TITLE, MessageRole, StoredMessage,
};
use crate::security::claims::UserContext;
use crate::session::{ClientIdentity, ConversationCoordinator};

use super::{AccountService, GENERATION_SERVICE, STORE_SERVICE, bounded};

/// Both sides of one completed exchange.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageExchange {
    pub user_message: StoredMessage,
    pub assistant_message: StoredMessage,
}

#[derive(Debug)]
pub struct ChatService {
    conversations: Arc<dyn ConversationStore>,
    accounts: Arc<AccountService>,
    completion: Arc<dyn CompletionClient>,
    coordinator: ConversationCoordinator,
    store_timeout: Duration,
    generation_timeout: Duration,
}

impl ChatService {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        accounts: Arc<AccountService>,
        completion: Arc<dyn CompletionClient>,
        coordinator: ConversationCoordinator,
        store_timeout: Duration,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            conversations,
            accounts,
            completion,
            coordinator,
            store_timeout,
            generation_timeout,
        }
    }

    pub fn coordinator(&self) -> &ConversationCoordinator {
        &self.coordinator
    }

    pub async fn list(&self, user: &UserContext) -> Result<Vec<Conversation>, AppError> {
        Ok(bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.conversations.list_conversations(&user.user_id),
        )
        .await?)
    }

    pub async fn create(
        &self,
        user: &UserContext,
        title: Option<&str>,
    ) -> Result<Conversation, AppError> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_CHAT_TITLE);
        let chat = bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.conversations.create_conversation(&user.user_id, title),
        )
        .await?;
        tracing::info!(user_id = %user.user_id, conversation_id = %chat.id, "Conversation created");
        Ok(chat)
    }

    /// The owned conversation and its messages, oldest first.
    pub async fn get(
        &self,
        user: &UserContext,
        conversation_id: &str,
    ) -> Result<(Conversation, Vec<StoredMessage>), AppError> {
        let chat = self.owned(user, conversation_id).await?;
        let messages = bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.conversations.list_messages(conversation_id),
        )
        .await?;
        Ok((chat, messages))
    }

    pub async fn update_title(
        &self,
        user: &UserContext,
        conversation_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, AppError> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Validation("Title is required".to_string()))?;

        bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.conversations
                .update_title(&user.user_id, conversation_id, title),
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Chat not found or not updated".to_string()))
    }

    pub async fn delete(&self, user: &UserContext, conversation_id: &str) -> Result<(), AppError> {
        bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.conversations
                .delete_conversation(&user.user_id, conversation_id),
        )
        .await?;
        tracing::info!(user_id = %user.user_id, conversation_id, "Conversation deleted");
        Ok(())
    }

    /// Persist `content`, generate the reply and persist it.
    ///
    /// The conversation is held for `client` from before the user message is
    /// written until this future completes or is dropped. A concurrent send
    /// from another client fails with [`AppError::Conflict`] instead of waiting.
    pub async fn send_message(
        &self,
        user: &UserContext,
        client: &ClientIdentity,
        conversation_id: &str,
        content: Option<&str>,
    ) -> Result<MessageExchange, AppError> {
        let content = content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AppError::Validation("Message content is required".to_string()))?;

        self.owned(user, conversation_id).await?;

        let _permit = self
            .coordinator
            .acquire(conversation_id, &user.user_id, client)
            .map_err(|denied| {
                tracing::info!(
                    conversation_id,
                    client = %client,
                    held_by = %denied.held_by,
                    "Conversation busy, send rejected"
                );
                AppError::Conflict
            })?;
        tracing::debug!(conversation_id, client = %client, "Conversation acquired");

        let user_message = bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.conversations
                .append_message(conversation_id, MessageRole::User, content),
        )
        .await?;

        let history = bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.conversations.list_messages(conversation_id),
        )
        .await?;
        let turns: Vec<ChatTurn> = history.iter().map(ChatTurn::from).collect();

        let credential = self.accounts.generation_credential(&user.user_id).await?;

        tracing::debug!(conversation_id, client = %client, turns = turns.len(), "Generating reply");
        let reply = bounded(
            GENERATION_SERVICE,
            self.generation_timeout,
            self.completion.complete(&turns, &credential),
        )
        .await?;

        let assistant_message = bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.conversations
                .append_message(conversation_id, MessageRole::Assistant, &reply),
        )
        .await?;

        bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.conversations.touch_conversation(conversation_id),
        )
        .await?;

        tracing::info!(
            conversation_id,
            client = %client,
            user_message_id = %user_message.id,
            assistant_message_id = %assistant_message.id,
            "Message exchange completed"
        );
        Ok(MessageExchange {
            user_message,
            assistant_message,
        })
    }

    async fn owned(
        &self,
        user: &UserContext,
        conversation_id: &str,
    ) -> Result<Conversation, AppError> {
        bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.conversations
                .get_conversation(&user.user_id, conversation_id),
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Chat not found".to_string()))
    }
}
