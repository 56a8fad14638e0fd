//! Per-conversation single-flight coordination.
//!
//! A conversation may have at most one in-flight generation at a time, no
//! matter how many browser tabs or devices the owner has open. Each UI session
//! identifies itself with an opaque [`ClientIdentity`]; the first identity to
//! acquire a conversation holds it until the guarded operation finishes.
//!
//! # Architecture
//!
//! - [`ConversationSession`]: volatile lock state for one conversation
//! - [`ConversationCoordinator`]: thread-safe map of sessions with acquire,
//!   release and idle sweep
//! - [`FlightPermit`]: scoped acquisition that releases on drop
//!
//! # Example
//!
//! ```rust
//! use chat_guard::session::{ClientIdentity, ConversationCoordinator};
//!
//! let coordinator = ConversationCoordinator::new();
//! let tab_a = ClientIdentity::new("tab-a");
//! let tab_b = ClientIdentity::new("tab-b");
//!
//! let permit = coordinator.acquire("c1", "user-1", &tab_a).unwrap();
//! assert!(coordinator.acquire("c1", "user-1", &tab_b).is_err());
//!
//! drop(permit);
//! assert!(coordinator.acquire("c1", "user-1", &tab_b).is_ok());
//! ```

mod coordinator;

pub use coordinator::{
    AcquireOutcome, ClientIdentity, ConversationCoordinator, ConversationSession, FlightDenied,
    FlightPermit, SessionState, DEFAULT_IDLE_TIMEOUT, DEFAULT_SWEEP_INTERVAL,
};
