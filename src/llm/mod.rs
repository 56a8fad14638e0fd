//! Completion collaborator.
//!
//! The [`CompletionClient`] trait turns an ordered conversation into the next
//! assistant reply. [`GeminiClient`] implements it against the Gemini
//! `generateContent` endpoint.

pub mod gemini;

pub use gemini::{GeminiClient, GeminiSettings};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::persistence::{MessageRole, StoredMessage};

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

impl From<&StoredMessage> for ChatTurn {
    fn from(message: &StoredMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync + std::fmt::Debug {
    /// Generate the assistant reply to `turns`, authenticating with `credential`.
    async fn complete(
        &self,
        turns: &[ChatTurn],
        credential: &str,
    ) -> Result<String, CollaboratorError>;
}
