use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
};
use serde_json::json;

use crate::AppState;
use crate::error::AppError;
use crate::persistence::{ProfileUpdate, SettingsUpdate};
use crate::security::claims::UserContext;

use super::json_body;

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
) -> Result<impl IntoResponse, AppError> {
    let profile = state.accounts.profile(&user.user_id).await?;
    Ok(Json(json!({ "profile": profile })))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let update = json_body(payload)?;
    let profile = state.accounts.update_profile(&user.user_id, &update).await?;
    Ok(Json(
        json!({ "message": "Profile updated successfully", "profile": profile }),
    ))
}

pub async fn get_settings(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
) -> Result<impl IntoResponse, AppError> {
    let settings = state.accounts.settings(&user.user_id).await?;
    Ok(Json(json!({ "settings": settings })))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    payload: Result<Json<SettingsUpdate>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let update = json_body(payload)?;
    let settings = state
        .accounts
        .update_settings(&user.user_id, &update)
        .await?;
    Ok(Json(
        json!({ "message": "Settings updated successfully", "settings": settings }),
    ))
}
