//! Business operations behind the HTTP handlers.
//!
//! - [`chat`]: conversations and the single-flight guarded message send
//! - [`account`]: cached profile and settings reads with write-through invalidation

pub mod account;
pub mod chat;

pub use account::AccountService;
pub use chat::{ChatService, MessageExchange};

use std::time::Duration;

use crate::error::CollaboratorError;

pub const STORE_SERVICE: &str = "store";
pub const GENERATION_SERVICE: &str = "generation";

/// Bound a collaborator call. Elapsing drops the inner future.
pub async fn bounded<T, F>(
    service: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_elapsed) => Err(CollaboratorError::Timeout {
            service,
            timeout: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, CollaboratorError>(())
        };
        let err = bounded(GENERATION_SERVICE, Duration::from_secs(30), slow)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CollaboratorError::Timeout {
                service: "generation",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let value = bounded(STORE_SERVICE, Duration::from_secs(5), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
