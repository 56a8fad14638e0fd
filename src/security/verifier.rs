//! Bearer token verification.

use axum::http::{HeaderMap, header};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use super::claims::{UserClaims, UserContext};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no bearer token provided")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token does not contain a user id")]
    MissingUserId,
}

/// Turns a bearer token into a verified caller identity.
pub trait TokenVerifier: Send + Sync + std::fmt::Debug {
    fn verify(&self, token: &str) -> Result<UserContext, AuthError>;
}

/// HS256 verifier sharing its secret with the token issuer.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("audience", &self.validation.aud)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Verify signature and expiry only. An `aud` claim, if present, is not checked.
    #[must_use]
    pub fn hs256(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Additionally require `aud` to contain `audience`.
    #[must_use]
    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<UserContext, AuthError> {
        let data = decode::<UserClaims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let claims = data.claims;
        let user_id = claims.user_id().ok_or(AuthError::MissingUserId)?.to_string();
        Ok(UserContext {
            user_id,
            email: claims.email,
        })
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn future_exp() -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap() + 3600
    }

    fn sign(claims: &serde_json::Value, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token() {
        let token = sign(
            &json!({ "id": "u1", "email": "a@example.com", "exp": future_exp() }),
            SECRET,
        );
        let user = JwtVerifier::hs256(SECRET).verify(&token).unwrap();
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = sign(&json!({ "id": "u1", "exp": future_exp() }), "other");
        let err = JwtVerifier::hs256(SECRET).verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let token = sign(&json!({ "id": "u1", "exp": 1_000 }), SECRET);
        assert!(JwtVerifier::hs256(SECRET).verify(&token).is_err());
    }

    #[test]
    fn test_token_without_user_id() {
        let token = sign(&json!({ "exp": future_exp() }), SECRET);
        assert_eq!(
            JwtVerifier::hs256(SECRET).verify(&token).unwrap_err(),
            AuthError::MissingUserId
        );
    }

    #[test]
    fn test_issuer_audience_is_accepted() {
        let token = sign(
            &json!({ "id": "123456", "aud": "authenticated", "exp": future_exp() }),
            SECRET,
        );
        let user = JwtVerifier::hs256(SECRET).verify(&token).unwrap();
        assert_eq!(user.user_id, "123456");

        let user = JwtVerifier::hs256(SECRET)
            .with_audience("authenticated")
            .verify(&token)
            .unwrap();
        assert_eq!(user.user_id, "123456");
    }

    #[test]
    fn test_configured_audience_rejects_other_tokens() {
        let verifier = JwtVerifier::hs256(SECRET).with_audience("authenticated");

        let other = sign(
            &json!({ "id": "u1", "aud": "someone-else", "exp": future_exp() }),
            SECRET,
        );
        assert!(matches!(
            verifier.verify(&other),
            Err(AuthError::InvalidToken(_))
        ));

        let missing = sign(&json!({ "id": "u1", "exp": future_exp() }), SECRET);
        assert!(verifier.verify(&missing).is_err());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), Err(AuthError::MissingToken));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), Err(AuthError::MissingToken));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Ok("abc.def"));
    }
}
