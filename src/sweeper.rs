//! Cancellable periodic maintenance tasks.
//!
//! Idle conversation sessions and expired cache entries are reclaimed by
//! background sweeps. Each sweep is an explicit task tied to a
//! [`CancellationToken`]: started at init, stopped at shutdown.

use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A set of running sweep tasks sharing one cancellation token.
#[derive(Debug)]
pub struct Sweepers {
    token: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Sweepers {
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            handles: Vec::new(),
        }
    }

    /// Token that stops every sweep of this set when cancelled.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Run `sweep` every `every` until the token is cancelled.
    ///
    /// The closure receives the tick instant and returns how many items it removed.
    pub fn spawn<F>(&mut self, name: &'static str, every: Duration, sweep: F)
    where
        F: FnMut(Instant) -> usize + Send + 'static,
    {
        let handle = spawn_periodic(name, every, self.token.clone(), sweep);
        self.handles.push((name, handle));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every sweep and wait for the tasks to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        let (names, handles): (Vec<_>, Vec<_>) = self.handles.into_iter().unzip();
        for (name, result) in names.into_iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                warn!(sweeper = name, error = %e, "Sweeper task ended abnormally");
            }
        }
    }
}

/// Spawn a periodic sweep. The first run happens one interval after start.
pub fn spawn_periodic<F>(
    name: &'static str,
    every: Duration,
    token: CancellationToken,
    mut sweep: F,
) -> JoinHandle<()>
where
    F: FnMut(Instant) -> usize + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(sweeper = name, interval_secs = every.as_secs(), "Sweeper started");

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = sweep(Instant::now());
                    if removed > 0 {
                        debug!(sweeper = name, removed, "Sweep removed stale entries");
                    }
                }
            }
        }

        debug!(sweeper = name, "Sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use crate::session::{ClientIdentity, ConversationCoordinator};

    #[tokio::test(start_paused = true)]
    async fn test_session_sweeper_reclaims_stuck_session() {
        let coordinator = ConversationCoordinator::new();
        // Simulate a crash that bypassed the release.
        std::mem::forget(
            coordinator
                .acquire("c1", "u1", &ClientIdentity::new("a"))
                .unwrap(),
        );

        let mut sweepers = Sweepers::new(CancellationToken::new());
        let swept = coordinator.clone();
        sweepers.spawn("sessions", Duration::from_secs(5 * 60), move |now| {
            swept.sweep_idle(now)
        });

        tokio::time::sleep(Duration::from_secs(29 * 60)).await;
        assert_eq!(coordinator.len(), 1);

        tokio::time::sleep(Duration::from_secs(7 * 60)).await;
        assert!(coordinator.is_empty());

        sweepers.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_sweeper_purges_expired_entries() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(300));
        cache.insert("u1".into(), 1);

        let mut sweepers = Sweepers::new(CancellationToken::new());
        let swept = cache.clone();
        sweepers.spawn("cache", Duration::from_secs(60), move |now| {
            swept.purge_expired(now)
        });

        tokio::time::sleep(Duration::from_secs(361)).await;
        assert!(cache.is_empty());

        sweepers.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_stops_sweeps() {
        let token = CancellationToken::new();
        let runs = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = std::sync::Arc::clone(&runs);
        let handle = spawn_periodic("count", Duration::from_secs(1), token.clone(), move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            0
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        token.cancel();
        handle.await.unwrap();

        let seen = runs.load(std::sync::atomic::Ordering::SeqCst);
        assert_eq!(seen, 3);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), seen);
    }
}
