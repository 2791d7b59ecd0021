//! Cluster collaborator seams: leadership and cluster-wide mutual exclusion.
//!
//! Both are provided by the surrounding deployment (a consensus service, a
//! lease table, ...). The in-process implementations here serve single-node
//! deployments and tests.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::LockError;

/// Tells whether this process is the elected singleton.
pub trait LeaderSignal: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Fixed leadership, for single-node deployments.
#[derive(Debug, Clone, Copy)]
pub struct StaticLeader(pub bool);

impl LeaderSignal for StaticLeader {
    fn is_leader(&self) -> bool {
        self.0
    }
}

/// Leadership flipped by an external election callback.
#[derive(Debug, Default)]
pub struct SwitchableLeader {
    leader: AtomicBool,
}

impl SwitchableLeader {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    pub fn set_leader(&self, leader: bool) {
        let previous = self.leader.swap(leader, Ordering::SeqCst);
        if previous != leader {
            tracing::info!(leader, "leadership changed");
        }
    }
}

impl LeaderSignal for SwitchableLeader {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

/// Runs `action` only on the elected singleton. Returns `None` elsewhere.
pub async fn run_if_leader<F, Fut, T>(signal: &dyn LeaderSignal, name: &str, action: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    if signal.is_leader() {
        Some(action().await)
    } else {
        tracing::debug!(action = name, "not the leader, skipping singleton action");
        None
    }
}

/// A named mutex that is exclusive across every process of the cluster.
#[async_trait]
pub trait DistributedMutex: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `None` if the mutex could not be taken within `timeout`.
    /// The mutex is held until the returned guard is dropped.
    async fn acquire(&self, timeout: Duration) -> Option<DistributedGuard>;
}

/// Holds a [`DistributedMutex`]. Dropping the guard releases the mutex,
/// including when the holder panics or its future is cancelled.
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct DistributedGuard {
    name: String,
    _lease: Box<dyn Any + Send + Sync>,
}

impl DistributedGuard {
    /// Wraps a backend lease whose `Drop` gives the mutex back.
    pub fn new(name: impl Into<String>, lease: impl Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            _lease: Box::new(lease),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn release(self) {}
}

impl Drop for DistributedGuard {
    fn drop(&mut self) {
        tracing::trace!(mutex = %self.name, "distributed mutex released");
    }
}

impl std::fmt::Debug for DistributedGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedGuard")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Process-local [`DistributedMutex`].
#[derive(Debug)]
pub struct LocalMutex {
    name: String,
    permits: Arc<Semaphore>,
}

impl LocalMutex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(1)),
        }
    }
}

#[async_trait]
impl DistributedMutex for LocalMutex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self, timeout: Duration) -> Option<DistributedGuard> {
        let permit = Arc::clone(&self.permits).acquire_owned();
        match tokio::time::timeout(timeout, permit).await {
            Ok(Ok(permit)) => Some(DistributedGuard::new(self.name.clone(), permit)),
            _ => None,
        }
    }
}

/// Runs `action` while holding `mutex`, failing if it cannot be taken in time.
pub async fn with_exclusive<M, F, Fut, T>(
    mutex: &M,
    timeout: Duration,
    action: F,
) -> Result<T, LockError>
where
    M: DistributedMutex + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let Some(_guard) = mutex.acquire(timeout).await else {
        metrics::counter!("distributed_lock_timeouts_total").increment(1);
        return Err(LockError::Timeout {
            resource: mutex.name().to_string(),
            timeout,
        });
    };
    Ok(action().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_if_leader_skips_followers() {
        let ran = run_if_leader(&StaticLeader(false), "sweep", || async { 1 }).await;
        assert_eq!(ran, None);

        let ran = run_if_leader(&StaticLeader(true), "sweep", || async { 1 }).await;
        assert_eq!(ran, Some(1));
    }

    #[test]
    fn switchable_leader_follows_election() {
        let signal = SwitchableLeader::new(false);
        assert!(!signal.is_leader());
        signal.set_leader(true);
        assert!(signal.is_leader());
    }

    #[tokio::test]
    async fn local_mutex_is_exclusive_until_released() {
        let mutex = LocalMutex::new("snapshots");

        let guard = mutex.acquire(Duration::from_millis(10)).await.unwrap();
        assert_eq!(guard.name(), "snapshots");
        assert!(mutex.acquire(Duration::from_millis(10)).await.is_none());

        guard.release();
        assert!(mutex.acquire(Duration::from_millis(10)).await.is_some());
    }

    #[tokio::test]
    async fn with_exclusive_fails_with_lock_timeout() {
        let mutex = LocalMutex::new("rebuild");
        let _held = mutex.acquire(Duration::from_millis(10)).await.unwrap();

        let result = with_exclusive(&mutex, Duration::from_millis(10), || async {}).await;

        assert!(matches!(
            result,
            Err(LockError::Timeout { resource, .. }) if resource == "rebuild"
        ));
    }

    #[tokio::test]
    async fn with_exclusive_releases_after_action() {
        let mutex = LocalMutex::new("rebuild");

        let value = with_exclusive(&mutex, Duration::from_millis(10), || async { 7 })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert!(mutex.acquire(Duration::from_millis(10)).await.is_some());
    }

    #[tokio::test]
    async fn cancelled_holder_releases_mutex() {
        let mutex = LocalMutex::new("rebuild");

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            with_exclusive(&mutex, Duration::from_millis(10), || {
                tokio::time::sleep(Duration::from_secs(5))
            }),
        )
        .await;

        assert!(cancelled.is_err());
        assert!(mutex.acquire(Duration::from_millis(50)).await.is_some());
    }

    #[tokio::test]
    async fn panicking_holder_releases_mutex() {
        let mutex = Arc::new(LocalMutex::new("rebuild"));
        let fail = true;

        let holder = {
            let mutex = Arc::clone(&mutex);
            tokio::spawn(async move {
                with_exclusive(mutex.as_ref(), Duration::from_millis(10), || async move {
                    if fail {
                        panic!("rebuild failed");
                    }
                    7
                })
                .await
            })
        };

        assert!(holder.await.unwrap_err().is_panic());
        assert!(mutex.acquire(Duration::from_millis(50)).await.is_some());
    }
}
