use crate::AppState;
use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default ceiling of concurrent requests per origin.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 100;

/// Origin key used when neither a peer address nor a trusted forward header is present.
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Per-origin concurrent request limiter.
///
/// Requests beyond the ceiling are rejected synchronously, never queued.
/// Counters exist only while an origin has requests in flight, so memory is
/// bounded by the number of active origins.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    inner: Arc<AdmissionInner>,
}

#[derive(Debug)]
struct AdmissionInner {
    counters: DashMap<String, usize>,
    ceiling: usize,
    rejected: AtomicU64,
}

/// The origin already has `ceiling` requests in flight.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("origin {origin} exceeded {ceiling} concurrent requests")]
pub struct AdmissionRejected {
    pub origin: String,
    pub ceiling: usize,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

impl AdmissionController {
    /// Create a controller. A ceiling of zero is raised to one.
    pub fn new(ceiling: usize) -> Self {
        Self {
            inner: Arc::new(AdmissionInner {
                counters: DashMap::new(),
                ceiling: ceiling.max(1),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.inner.ceiling
    }

    /// Admit one request for `origin`.
    ///
    /// The check and the increment happen under the same entry lock. The
    /// returned permit calls [`complete`](Self::complete) exactly once when dropped.
    pub fn admit(&self, origin: &str) -> Result<AdmissionPermit, AdmissionRejected> {
        {
            let mut count = self.inner.counters.entry(origin.to_string()).or_insert(0);
            if *count >= self.inner.ceiling {
                drop(count);
                self.inner.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(AdmissionRejected {
                    origin: origin.to_string(),
                    ceiling: self.inner.ceiling,
                });
            }
            *count += 1;
        }

        Ok(AdmissionPermit {
            controller: self.clone(),
            origin: origin.to_string(),
        })
    }

    /// Record the completion of one admitted request; removes the counter at zero.
    pub fn complete(&self, origin: &str) {
        if let Some(mut count) = self.inner.counters.get_mut(origin) {
            *count = count.saturating_sub(1);
        }
        self.inner.counters.remove_if(origin, |_, count| *count == 0);
    }

    /// Requests currently in flight for `origin`.
    pub fn in_flight(&self, origin: &str) -> usize {
        self.inner.counters.get(origin).map_or(0, |c| *c)
    }

    /// Number of origins with at least one request in flight.
    pub fn tracked_origins(&self) -> usize {
        self.inner.counters.len()
    }

    /// Total rejections since startup.
    pub fn rejected_total(&self) -> u64 {
        self.inner.rejected.load(Ordering::Relaxed)
    }
}

/// An admitted request. Dropping it completes the request.
#[derive(Debug)]
#[must_use = "dropping the permit completes the request immediately"]
pub struct AdmissionPermit {
    controller: AdmissionController,
    origin: String,
}

impl AdmissionPermit {
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.controller.complete(&self.origin);
    }
}

/// Derive the admission key for a request.
///
/// Uses the first `X-Forwarded-For` hop when the deployment sits behind a
/// trusted proxy, otherwise the peer IP.
pub fn origin_key(req: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for
        && let Some(forwarded) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| UNKNOWN_ORIGIN.to_string(), |info| info.0.ip().to_string())
}

/// Middleware enforcing per-origin admission. Only CORS may wrap it.
pub async fn admission_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.config.admission.enabled {
        return Ok(next.run(req).await);
    }

    let origin = origin_key(&req, state.config.server.trust_forwarded_for);
    let _permit = state.admission.admit(&origin).map_err(|rejected| {
        tracing::warn!(
            origin = %rejected.origin,
            ceiling = rejected.ceiling,
            "Admission rejected"
        );
        AppError::Admission
    })?;

    Ok(next.run(req).await)
}
