//! Per-record mutual exclusion for operations that consume records.
//!
//! Two merges sharing a source must not run their read-validate-write
//! sequences at the same time. Locks are taken in ascending id order so
//! overlapping requests cannot deadlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = Mutex<HashMap<i32, Arc<AsyncMutex<()>>>>;

#[derive(Debug, Default, Clone)]
pub struct RecordLocks {
    registry: Arc<Registry>,
}

/// Holds the locks of a set of records until dropped.
#[derive(Debug)]
pub struct RecordLockGuard {
    guards: Vec<OwnedMutexGuard<()>>,
    registry: Arc<Registry>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, record_ids: &[i32]) -> RecordLockGuard {
        let mut ids = record_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut registry = self
                .registry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            ids.iter()
                .map(|id| registry.entry(*id).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }

        RecordLockGuard {
            guards,
            registry: self.registry.clone(),
        }
    }

    /// Number of records currently tracked.
    pub fn tracked(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Drop for RecordLockGuard {
    fn drop(&mut self) {
        self.guards.clear();
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registry.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_overlapping_sets_are_serialized() {
        let locks = RecordLocks::new();
        let first = locks.acquire(&[3, 1]).await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _guard = contender.acquire(&[1, 2]).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_disjoint_sets_do_not_block() {
        let locks = RecordLocks::new();
        let _first = locks.acquire(&[1, 2]).await;

        tokio::time::timeout(Duration::from_millis(100), locks.acquire(&[3, 4]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_released_locks_are_pruned() {
        let locks = RecordLocks::new();
        {
            let _guard = locks.acquire(&[5, 6, 6]).await;
            assert_eq!(locks.tracked(), 2);
        }
        assert_eq!(locks.tracked(), 0);
    }
}
