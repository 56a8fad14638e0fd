//! Gemini `generateContent` driver.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::CollaboratorError;
use crate::persistence::MessageRole;

use super::{ChatTurn, CompletionClient};

const SERVICE: &str = "generation";

/// Model and sampling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiSettings {
    /// Base URL, e.g. `https://generativelanguage.googleapis.com`.
    pub base_url: String,
    pub api_version: String,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_version: "v1beta".to_string(),
            model: "gemini-2.0-flash".to_string(),
            timeout: Duration::from_secs(30),
            temperature: 0.7,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 2048,
        }
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    settings: GeminiSettings,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    #[must_use]
    pub fn new(settings: GeminiSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}/models/{}:generateContent",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.api_version,
            self.settings.model
        )
    }

    fn request_body(&self, turns: &[ChatTurn]) -> Value {
        let contents: Vec<Value> = turns
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "model",
                };
                json!({ "role": role, "parts": [{ "text": turn.content }] })
            })
            .collect();

        json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.settings.temperature,
                "topP": self.settings.top_p,
                "topK": self.settings.top_k,
                "maxOutputTokens": self.settings.max_output_tokens,
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Concatenated text parts of the first candidate.
fn reply_text(response: GenerateResponse) -> Result<String, CollaboratorError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(CollaboratorError::Malformed {
            service: SERVICE,
            reason: "response contained no text candidate".to_string(),
        });
    }
    Ok(text)
}

fn classify_status(status: reqwest::StatusCode) -> CollaboratorError {
    match status.as_u16() {
        // Gemini reports an invalid API key as 400 INVALID_ARGUMENT.
        400 | 401 | 403 => CollaboratorError::Credential { service: SERVICE },
        code => CollaboratorError::Status {
            service: SERVICE,
            status: code,
        },
    }
}

#[async_trait]
impl CompletionClient for GeminiClient {
    async fn complete(
        &self,
        turns: &[ChatTurn],
        credential: &str,
    ) -> Result<String, CollaboratorError> {
        let timeout = self.settings.timeout;
        tracing::debug!(
            model = %self.settings.model,
            turns = turns.len(),
            "Calling generation API"
        );
        let started = std::time::Instant::now();

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", credential)
            .timeout(timeout)
            .json(&self.request_body(turns))
            .send()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, timeout, &e))?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Generation API returned an error status");
            return Err(classify_status(status));
        }

        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, timeout, &e))?;
        let text = reply_text(body)?;

        tracing::debug!(
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            chars = text.len(),
            "Generation API responded"
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: MessageRole, content: &str) -> ChatTurn {
        ChatTurn {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_endpoint() {
        let client = GeminiClient::new(GeminiSettings::default());
        assert_eq!(
            client.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn test_request_body_maps_assistant_to_model() {
        let client = GeminiClient::new(GeminiSettings::default());
        let body = client.request_body(&[
            turn(MessageRole::User, "hi"),
            turn(MessageRole::Assistant, "hello"),
        ]);

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][1]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn test_reply_text_joins_parts_of_first_candidate() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "parts": [{ "text": "Hello, " }, { "text": "world" }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        }))
        .unwrap();
        assert_eq!(reply_text(response).unwrap(), "Hello, world");
    }

    #[test]
    fn test_empty_reply_is_malformed() {
        let response: GenerateResponse =
            serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert!(matches!(
            reply_text(response),
            Err(CollaboratorError::Malformed { .. })
        ));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(reqwest::StatusCode::FORBIDDEN),
            CollaboratorError::Credential { .. }
        ));
        let err = classify_status(reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.is_retryable());
        assert!(!classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS).is_retryable());
    }
}
