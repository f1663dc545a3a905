//! Connection lease accounting.
//!
//! hyper's pool keeps idle connections but never caps how many are open at
//! once. [`ConnectionLimiter`] adds the cap: every exchange holds a lease for
//! its whole duration (request, response head and body), and callers beyond
//! the ceiling wait instead of failing.

use crate::error::HttpError;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds concurrent exchanges globally and, optionally, per destination host.
#[derive(Clone, Debug)]
pub struct ConnectionLimiter {
    global: Arc<Semaphore>,
    capacity: usize,
    per_route: Option<usize>,
    routes: Arc<DashMap<String, Arc<Semaphore>>>,
}

/// Proof of a reserved slot; dropping it frees the slot.
#[derive(Debug)]
pub struct Lease {
    _route: Option<OwnedSemaphorePermit>,
    _global: OwnedSemaphorePermit,
}

impl ConnectionLimiter {
    /// `max` and `per_route` are clamped to at least one slot.
    #[must_use]
    pub fn new(max: usize, per_route: Option<usize>) -> Self {
        let capacity = max.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            global: Arc::new(Semaphore::new(capacity)),
            capacity,
            per_route: per_route.map(|n| n.clamp(1, capacity)),
            routes: Arc::new(DashMap::new()),
        }
    }

    /// Wait for a slot on `route` (normally `host:port`).
    ///
    /// The route slot is taken before the global one, so a caller queued on a
    /// saturated host does not hold a global slot other hosts could use.
    ///
    /// # Errors
    /// `ServiceClosed` if the limiter was closed.
    pub async fn acquire(&self, route: &str) -> Result<Lease, HttpError> {
        let route_permit = match self.route_semaphore(route) {
            Some(sem) => Some(Self::wait(sem, route).await?),
            None => None,
        };
        let global = Self::wait(Arc::clone(&self.global), route).await?;
        Ok(Lease {
            _route: route_permit,
            _global: global,
        })
    }

    /// Exchanges currently holding a lease
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.capacity - self.global.available_permits()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn route_semaphore(&self, route: &str) -> Option<Arc<Semaphore>> {
        let limit = self.per_route?;
        let entry = self
            .routes
            .entry(route.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(limit)));
        Some(Arc::clone(entry.value()))
    }

    async fn wait(sem: Arc<Semaphore>, route: &str) -> Result<OwnedSemaphorePermit, HttpError> {
        match Arc::clone(&sem).try_acquire_owned() {
            Ok(permit) => Ok(permit),
            Err(tokio::sync::TryAcquireError::Closed) => Err(HttpError::ServiceClosed),
            Err(tokio::sync::TryAcquireError::NoPermits) => {
                tracing::trace!(route, "connection limit reached; waiting for a lease");
                sem.acquire_owned()
                    .await
                    .map_err(|_| HttpError::ServiceClosed)
            }
        }
    }
}

/// Route key for a request URI: `host:port` with the scheme's default port.
pub fn route_key(uri: &http::Uri) -> String {
    let host = uri.host().unwrap_or_default();
    let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
        Some("http") => 80,
        _ => 443,
    });
    format!("{host}:{port}")
}
