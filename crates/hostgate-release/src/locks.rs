//! Per-application serialization

use dashmap::DashMap;
use hostgate_guard::AppSlug;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// In-process advisory locks keyed by application slug
///
/// Unrelated applications never contend. Entries are created on first use
/// and removed when the last holder or waiter lets go.
#[derive(Debug, Clone, Default)]
pub struct AppLocks {
    inner: Arc<DashMap<AppSlug, Arc<Mutex<()>>>>,
}

/// Exclusive access to one application until dropped
#[derive(Debug)]
#[must_use = "the application is unlocked as soon as the guard is dropped"]
pub struct AppLockGuard {
    slug: AppSlug,
    table: Arc<DashMap<AppSlug, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AppLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the Arc, so a count of one means only the
        // table still refers to the mutex.
        self.table
            .remove_if(&self.slug, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl AppLocks {
    /// Create new lock table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `slug`
    pub async fn acquire(&self, slug: &AppSlug) -> AppLockGuard {
        let lock = self
            .inner
            .entry(slug.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(app = %slug, "waiting for application lock");
                lock.lock_owned().await
            }
        };
        AppLockGuard {
            slug: slug.clone(),
            table: Arc::clone(&self.inner),
            guard: Some(guard),
        }
    }

    /// Number of applications currently locked or awaited
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
