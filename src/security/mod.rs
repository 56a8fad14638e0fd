//! Caller authentication and admission control.
//!
//! - [`admission`]: per-origin concurrent request ceiling (outermost stateful layer)
//! - [`verifier`]: bearer token verification collaborator
//! - [`middleware`]: axum middleware injecting the verified [`claims::UserContext`]

pub mod admission;
pub mod claims;
pub mod middleware;
pub mod verifier;

/// Header carrying the caller's [`crate::session::ClientIdentity`].
pub const CLIENT_INSTANCE_HEADER: &str = "x-client-instance";
