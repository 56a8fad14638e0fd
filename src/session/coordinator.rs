//! Conversation lock state and the coordinator that owns it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Sessions untouched for longer than this are evicted by the sweep (30 minutes).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How often the idle sweep runs (5 minutes).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Identity used when a caller does not send `X-Client-Instance`.
const UNKNOWN_CLIENT: &str = "unknown-client";

/// Opaque, caller-supplied identifier of one UI session.
///
/// The value is untrusted: it only distinguishes independent tabs or devices
/// of the same user and carries no authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Wrap a raw identity string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity assigned to callers that did not identify themselves.
    #[must_use]
    pub fn unknown() -> Self {
        Self(UNKNOWN_CLIENT.to_string())
    }

    /// Build an identity from an optional header value.
    ///
    /// Missing or blank values map to [`ClientIdentity::unknown`].
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Self::new(v),
            _ => Self::unknown(),
        }
    }

    /// Borrow the raw identity.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lock state of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nobody is generating; the next acquire succeeds.
    Idle,
    /// A generation is in flight for the holder.
    Processing,
}

/// Volatile single-flight record for one conversation.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    conversation_id: String,
    owner_user_id: String,
    holder: ClientIdentity,
    state: SessionState,
    last_activity: Instant,
    /// Bumped on every non-re-entrant grant.
    epoch: u64,
}

impl ConversationSession {
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    #[must_use]
    pub fn owner_user_id(&self) -> &str {
        &self.owner_user_id
    }

    /// The client identity that last acquired the conversation.
    #[must_use]
    pub fn holder(&self) -> &ClientIdentity {
        &self.holder
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    fn is_idle_longer_than(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }
}

/// Result of [`ConversationCoordinator::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The caller now holds the conversation.
    Granted,
    /// Another client identity holds the conversation.
    Denied {
        /// Current holder. Never expose this to other callers.
        held_by: ClientIdentity,
    },
}

impl AcquireOutcome {
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Error returned by [`ConversationCoordinator::acquire`] when the
/// conversation is held by a different client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("conversation {conversation_id} is being processed by another client")]
pub struct FlightDenied {
    pub conversation_id: String,
    pub held_by: ClientIdentity,
}

/// Thread-safe owner of all conversation sessions.
///
/// Cloning is cheap and every clone shares the same state. Each acquire is a
/// single entry-level critical section on the session map, so two concurrent
/// requests can never both observe a missing session.
#[derive(Debug, Clone)]
pub struct ConversationCoordinator {
    inner: Arc<CoordinatorInner>,
}

#[derive(Debug)]
struct CoordinatorInner {
    sessions: DashMap<String, ConversationSession>,
    idle_timeout: Duration,
    next_epoch: AtomicU64,
}

impl Default for ConversationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationCoordinator {
    /// Create a coordinator with the default 30 minute idle timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }

    /// Create a coordinator that evicts sessions idle longer than `idle_timeout`.
    #[must_use]
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                sessions: DashMap::new(),
                idle_timeout,
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    /// Try to take the conversation for `client`.
    ///
    /// - no session: create one in `Processing` held by `client`
    /// - `Idle`: move to `Processing` held by `client`
    /// - `Processing` by `client`: re-entrant grant, activity refreshed
    /// - `Processing` by someone else: denied, session unchanged
    ///
    /// This is the raw contract; callers that guard an operation should use
    /// [`acquire`](Self::acquire) so the release cannot be forgotten.
    pub fn try_acquire(
        &self,
        conversation_id: &str,
        owner_user_id: &str,
        client: &ClientIdentity,
    ) -> AcquireOutcome {
        match self.grant(conversation_id, owner_user_id, client, Instant::now()) {
            Ok(_) => AcquireOutcome::Granted,
            Err(held_by) => AcquireOutcome::Denied { held_by },
        }
    }

    /// Scoped acquisition: the returned permit releases the conversation when
    /// it is dropped, on every exit path of the guarded operation.
    pub fn acquire(
        &self,
        conversation_id: &str,
        owner_user_id: &str,
        client: &ClientIdentity,
    ) -> Result<FlightPermit, FlightDenied> {
        match self.grant(conversation_id, owner_user_id, client, Instant::now()) {
            Ok(epoch) => Ok(FlightPermit {
                coordinator: self.clone(),
                conversation_id: conversation_id.to_string(),
                epoch,
            }),
            Err(held_by) => Err(FlightDenied {
                conversation_id: conversation_id.to_string(),
                held_by,
            }),
        }
    }

    fn grant(
        &self,
        conversation_id: &str,
        owner_user_id: &str,
        client: &ClientIdentity,
        now: Instant,
    ) -> Result<u64, ClientIdentity> {
        match self.inner.sessions.entry(conversation_id.to_string()) {
            Entry::Vacant(slot) => {
                let epoch = self.bump_epoch();
                slot.insert(ConversationSession {
                    conversation_id: conversation_id.to_string(),
                    owner_user_id: owner_user_id.to_string(),
                    holder: client.clone(),
                    state: SessionState::Processing,
                    last_activity: now,
                    epoch,
                });
                Ok(epoch)
            }
            Entry::Occupied(mut slot) => {
                let session = slot.get_mut();
                match session.state {
                    SessionState::Processing if session.holder != *client => {
                        Err(session.holder.clone())
                    }
                    SessionState::Processing => {
                        session.last_activity = now;
                        Ok(session.epoch)
                    }
                    SessionState::Idle => {
                        session.state = SessionState::Processing;
                        session.holder = client.clone();
                        owner_user_id.clone_into(&mut session.owner_user_id);
                        session.last_activity = now;
                        session.epoch = self.bump_epoch();
                        Ok(session.epoch)
                    }
                }
            }
        }
    }

    fn bump_epoch(&self) -> u64 {
        self.inner.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    /// Mark the conversation `Idle`.
    ///
    /// Idempotent: releasing an absent or already idle session is a no-op
    /// apart from refreshing its activity timestamp.
    pub fn release(&self, conversation_id: &str) {
        if let Some(mut session) = self.inner.sessions.get_mut(conversation_id) {
            session.state = SessionState::Idle;
            session.last_activity = Instant::now();
        }
    }

    /// Release only if the session still belongs to the grant identified by `epoch`.
    fn release_grant(&self, conversation_id: &str, epoch: u64) {
        if let Some(mut session) = self.inner.sessions.get_mut(conversation_id)
            && session.epoch == epoch
        {
            session.state = SessionState::Idle;
            session.last_activity = Instant::now();
        }
    }

    /// Remove every session idle longer than the idle timeout, whatever its state.
    ///
    /// Returns the number of sessions removed.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let timeout = self.inner.idle_timeout;
        let mut removed = 0;
        self.inner.sessions.retain(|id, session| {
            if session.is_idle_longer_than(timeout, now) {
                tracing::debug!(
                    conversation_id = %id,
                    user_id = %session.owner_user_id,
                    state = ?session.state,
                    "Removing inactive conversation session"
                );
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Snapshot of a session, if one exists.
    #[must_use]
    pub fn session(&self, conversation_id: &str) -> Option<ConversationSession> {
        self.inner
            .sessions
            .get(conversation_id)
            .map(|s| s.value().clone())
    }

    #[must_use]
    pub fn state(&self, conversation_id: &str) -> Option<SessionState> {
        self.inner.sessions.get(conversation_id).map(|s| s.state)
    }

    /// Number of tracked sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }
}

/// Proof of holding a conversation. Dropping it releases the conversation.
#[derive(Debug)]
#[must_use = "dropping the permit releases the conversation immediately"]
pub struct FlightPermit {
    coordinator: ConversationCoordinator,
    conversation_id: String,
    epoch: u64,
}

impl FlightPermit {
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.coordinator
            .release_grant(&self.conversation_id, self.epoch);
    }
}
