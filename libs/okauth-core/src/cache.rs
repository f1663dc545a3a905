//! In-memory token cache with per-entry expiry.
//!
//! Every saved entry gets a child of the cache's root [`CancellationToken`]
//! and, when a tokio runtime is available, a task that evicts the entry at
//! its deadline. Re-saving or removing a key cancels the previous task, and
//! dropping the last handle to the cache cancels all of them. Reads also
//! check the deadline, so an entry is never served past its expiry even if
//! its task has not run yet.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::token::OAuthToken;

/// TTL for tokens that carry no expiry of their own
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Shared handle to a token cache. Clones refer to the same entries.
#[derive(Clone)]
pub struct TokenCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    entries: DashMap<String, Entry>,
    root: CancellationToken,
    default_ttl: Duration,
    generation: AtomicU64,
}

struct Entry {
    token: OAuthToken,
    generation: u64,
    cancel: CancellationToken,
    /// `None` when the deadline does not fit in an `Instant`
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TTL)
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("entries", &self.inner.entries.len())
            .field("default_ttl", &self.inner.default_ttl)
            .finish()
    }
}

impl TokenCache {
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                root: CancellationToken::new(),
                default_ttl,
                generation: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Store `token` under `key` for `ttl` (the cache default when `None`),
    /// replacing and cancelling any previous entry.
    pub fn save(&self, key: impl Into<String>, token: OAuthToken, ttl: Option<Duration>) {
        let key = key.into();
        let ttl = ttl.unwrap_or(self.inner.default_ttl);
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.root.child_token();
        let expires_at = Instant::now().checked_add(ttl);

        let previous = self.inner.entries.insert(
            key.clone(),
            Entry {
                token,
                generation,
                cancel: cancel.clone(),
                expires_at,
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        if let Some(deadline) = expires_at {
            spawn_expiry(Arc::downgrade(&self.inner), key, generation, cancel, deadline);
        }
    }

    /// Unexpired token stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<OAuthToken> {
        {
            let entry = self.inner.entries.get(key)?;
            if !entry.is_expired() {
                return Some(entry.token.clone());
            }
        }
        if let Some((_, stale)) = self.inner.entries.remove_if(key, |_, e| e.is_expired()) {
            stale.cancel.cancel();
        }
        None
    }

    /// Remove `key` and cancel its expiry task.
    pub fn remove(&self, key: &str) -> Option<OAuthToken> {
        let (_, entry) = self.inner.entries.remove(key)?;
        entry.cancel.cancel();
        Some(entry.token)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Stored entries, including expired ones whose eviction is pending
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

fn spawn_expiry(
    cache: Weak<CacheInner>,
    key: String,
    generation: u64,
    cancel: CancellationToken,
    deadline: Instant,
) {
    // Outside a runtime expiry is enforced lazily by `get`.
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    handle.spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep_until(deadline) => {
                if let Some(inner) = cache.upgrade()
                    && inner.entries.remove_if(&key, |_, e| e.generation == generation).is_some()
                {
                    tracing::trace!(generation, "token cache entry expired");
                }
            }
        }
    });
}
