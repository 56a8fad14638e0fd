//! HTTP handlers. Everything under `/api` requires a verified bearer token.

pub mod account;
pub mod chats;

use axum::{
    Json, Router,
    extract::rejection::JsonRejection,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::AppState;
use crate::error::AppError;
use crate::security::middleware::auth_middleware;

/// Authenticated routes, mounted at `/api`.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/chats", get(chats::list).post(chats::create))
        .route(
            "/chats/{chat_id}",
            get(chats::get).put(chats::update).delete(chats::delete),
        )
        .route("/chats/{chat_id}/messages", post(chats::send_message))
        .route(
            "/users/profile",
            get(account::get_profile).put(account::update_profile),
        )
        .route(
            "/settings",
            get(account::get_settings).put(account::update_settings),
        )
        .route_layer(from_fn_with_state(state, auth_middleware))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": env!("CARGO_PKG_NAME") }))
}

/// Unwrap a JSON body, reporting malformed input as a 400 with the standard error body.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| AppError::Validation(e.body_text()))
}
