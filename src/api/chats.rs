use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::error::AppError;
use crate::security::claims::UserContext;
use crate::session::ClientIdentity;

use super::json_body;

#[derive(Debug, Default, Deserialize)]
pub struct TitleRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    client: ClientIdentity,
) -> Result<impl IntoResponse, AppError> {
    let chats = state.chats.list(&user).await?;
    tracing::debug!(client = %client, user_id = %user.user_id, count = chats.len(), "Listed conversations");
    Ok(Json(json!({ "chats": chats })))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    payload: Result<Json<TitleRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    // The body is optional; a bare POST creates an untitled conversation.
    let req = match payload {
        Err(JsonRejection::MissingJsonContentType(_)) => TitleRequest::default(),
        other => json_body(other)?,
    };
    let chat = state.chats.create(&user, req.title.as_deref()).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Chat created successfully", "chat": chat })),
    ))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Path(chat_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (chat, messages) = state.chats.get(&user, &chat_id).await?;
    Ok(Json(json!({ "chat": chat, "messages": messages })))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Path(chat_id): Path<String>,
    payload: Result<Json<TitleRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = json_body(payload)?;
    let chat = state
        .chats
        .update_title(&user, &chat_id, req.title.as_deref())
        .await?;
    Ok(Json(
        json!({ "message": "Chat title updated successfully", "chat": chat }),
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Path(chat_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.chats.delete(&user, &chat_id).await?;
    Ok(Json(json!({ "message": "Chat deleted successfully" })))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    client: ClientIdentity,
    Path(chat_id): Path<String>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = json_body(payload)?;
    tracing::debug!(client = %client, user_id = %user.user_id, conversation_id = %chat_id, "Processing message");

    let exchange = state
        .chats
        .send_message(&user, &client, &chat_id, req.content.as_deref())
        .await?;
    Ok(Json(exchange))
}
