use crate::AppState;
use crate::error::AppError;
use crate::session::ClientIdentity;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;

use super::CLIENT_INSTANCE_HEADER;
use super::verifier::{AuthError, bearer_token};

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = client_identity(request.headers());

    // 1. Get bearer token
    let token = bearer_token(request.headers()).map_err(|e| {
        tracing::debug!(client = %client, path = %request.uri().path(), error = %e, "No bearer token provided");
        AppError::Unauthorized("Access denied. No token provided.".to_string())
    })?;

    // 2. Verify
    match state.verifier.verify(token) {
        Ok(context) => {
            tracing::debug!(client = %client, user_id = %context.user_id, "Token verified");
            // 3. Inject Context
            request.extensions_mut().insert(context);
            Ok(next.run(request).await)
        }
        Err(AuthError::MissingUserId) => {
            tracing::debug!(client = %client, "Token does not contain a user id");
            Err(AppError::Unauthorized(
                "Invalid token: missing user ID".to_string(),
            ))
        }
        Err(e) => {
            tracing::debug!(client = %client, error = %e, "Token verification failed");
            Err(AppError::Unauthorized("Invalid token".to_string()))
        }
    }
}

fn client_identity(headers: &axum::http::HeaderMap) -> ClientIdentity {
    ClientIdentity::from_header(
        headers
            .get(CLIENT_INSTANCE_HEADER)
            .and_then(|v| v.to_str().ok()),
    )
}

/// Extracts the `X-Client-Instance` header; never rejects.
impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(client_identity(&parts.headers))
    }
}
