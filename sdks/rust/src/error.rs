//! Failures surfaced by the client.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Connection, TLS or body transfer failed before a status was read.
    #[error("transport failure: {0}")]
    #[cfg(feature = "http-client")]
    Http(#[from] reqwest::Error),

    #[error("bad base url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unreadable body: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered with a non-2xx status and `{"error": ...}`.
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Every attempt got 409 because another session held the conversation.
    #[error("conversation still busy after {attempts} attempts")]
    Busy { attempts: u32 },
}

impl Error {
    /// Status code the server sent, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Busy { .. } => Some(409),
            _ => None,
        }
    }

    /// Busy, throttled or upstream-unavailable responses may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self.status(), Some(409 | 429 | 503 | 504))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_retryable() {
        let busy = Error::Busy { attempts: 4 };
        assert_eq!(busy.status(), Some(409));
        assert!(busy.is_retryable());

        let missing = Error::Api {
            status: 404,
            message: "Chat not found".into(),
        };
        assert!(!missing.is_retryable());

        let throttled = Error::Api {
            status: 429,
            message: "Too many requests. Please try again later.".into(),
        };
        assert!(throttled.is_retryable());
    }
}
