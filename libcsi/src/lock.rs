//! Per-key mutual exclusion.
//!
//! The orchestrator retries and races lifecycle calls freely.  Transitions
//! that check state and then act on it (query the mount table, then mount)
//! must not interleave for the same key, while unrelated keys proceed in
//! parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A table of async mutexes created on demand, one per key.
///
/// Entries are removed again once nobody holds or waits for them, so the
/// table only ever contains keys with a transition in flight.
#[derive(Debug, Clone, Default)]
pub struct KeyedLock {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// The returned guard is `'static` and can be moved into a blocking
    /// task, which keeps the key locked until that task finishes even when
    /// the awaiting caller is dropped.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = self
            .locks
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // Runs after the pending acquire is dropped when this future is
        // cancelled, so an abandoned wait does not pin the entry.
        let _reclaim = Reclaim {
            locks: &self.locks,
            key,
        };
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            key: key.to_owned(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one key of a [`KeyedLock`].
#[derive(Debug)]
pub struct KeyedGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Release the mutex (and our reference to it) first, then drop the
        // entry if the table holds the last reference.  Waiters clone the Arc
        // under the same shard lock `remove_if` takes.
        drop(self.guard.take());
        reclaim(&self.locks, &self.key);
    }
}

/// Removes the entry for `key` on drop unless someone still references it.
struct Reclaim<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
}

impl Drop for Reclaim<'_> {
    fn drop(&mut self) {
        reclaim(self.locks, self.key);
    }
}

fn reclaim(locks: &DashMap<String, Arc<Mutex<()>>>, key: &str) {
    locks.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = KeyedLock::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("/mnt/a").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLock::new();
        let a = locks.lock("/mnt/a").await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock("/mnt/b"))
            .await
            .expect("unrelated key must not wait");
        assert_eq!(locks.len(), 2);

        drop(a);
        drop(b);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn guard_outlives_cancelled_waiter() {
        let locks = KeyedLock::new();
        let guard = locks.lock("vol").await;

        // A waiter that gives up must not leave the entry behind or steal
        // the lock.
        let waited = tokio::time::timeout(Duration::from_millis(20), locks.lock("vol")).await;
        assert!(waited.is_err());
        assert_eq!(locks.len(), 1);

        let handle = tokio::task::spawn_blocking(move || {
            std::thread::sleep(Duration::from_millis(10));
            drop(guard);
        });
        handle.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn abandoned_waiter_after_release_leaves_no_entry() {
        let locks = KeyedLock::new();
        let guard = locks.lock("vol").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("vol").await;
                std::future::pending::<()>().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The queued waiter still references the entry.
        drop(guard);
        assert_eq!(locks.len(), 1);

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert!(locks.is_empty());
    }
}
