//! Keyed exclusive locks
//!
//! Every mutating operation locks the items it transitions and the users it
//! debits. Keys are acquired in sorted order, so two operations that need
//! overlapping sets cannot deadlock. Guards release on drop, on every exit
//! path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::core_types::{ItemId, UserId};
use crate::error::ExchangeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    User(UserId),
    Item(ItemId),
    /// Serializes first-admin creation
    Bootstrap,
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::User(id) => write!(f, "user {}", id),
            LockKey::Item(id) => write!(f, "item {}", id),
            LockKey::Bootstrap => write!(f, "admin bootstrap"),
        }
    }
}

/// Held locks; dropping releases all of them
#[must_use = "locks are released as soon as the guard is dropped"]
pub struct LockGuard {
    keys: Vec<LockKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockGuard {
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }
}

#[derive(Default)]
pub struct LockTable {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every key, waiting at most `timeout` in total
    ///
    /// # Errors
    /// `Conflict` when the timeout elapses; any locks taken so far are released.
    pub async fn acquire(
        &self,
        keys: impl IntoIterator<Item = LockKey>,
        timeout: Duration,
    ) -> Result<LockGuard, ExchangeError> {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mutexes: Vec<Arc<Mutex<()>>> = keys
            .iter()
            .map(|k| self.locks.entry(*k).or_default().clone())
            .collect();

        let acquire_all = async {
            let mut guards = Vec::with_capacity(mutexes.len());
            for m in mutexes {
                guards.push(m.lock_owned().await);
            }
            guards
        };

        match tokio::time::timeout(timeout, acquire_all).await {
            Ok(guards) => {
                debug!(count = keys.len(), "Locks acquired");
                Ok(LockGuard {
                    keys,
                    _guards: guards,
                })
            }
            Err(_) => {
                let resource = keys
                    .first()
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "lock table".to_string());
                warn!(
                    keys = keys.len(),
                    first = %resource,
                    timeout_ms = timeout.as_millis() as u64,
                    "Lock acquisition timed out"
                );
                Err(ExchangeError::Conflict { resource })
            }
        }
    }

    /// Number of keys ever locked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_keys_sorted_and_deduped() {
        let table = LockTable::new();
        let item = ItemId::new();
        let user = UserId::new();
        let guard = table
            .acquire(
                [LockKey::Item(item), LockKey::User(user), LockKey::Item(item)],
                TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(guard.keys(), &[LockKey::User(user), LockKey::Item(item)]);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_held_key_times_out() {
        let table = LockTable::new();
        let key = LockKey::Item(ItemId::new());
        let _held = table.acquire([key], TIMEOUT).await.unwrap();

        let err = table
            .acquire([key], Duration::from_millis(20))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExchangeError::Conflict { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_released_on_drop() {
        let table = LockTable::new();
        let key = LockKey::User(UserId::new());
        {
            let _g = table.acquire([key], TIMEOUT).await.unwrap();
        }
        assert!(table.acquire([key], TIMEOUT).await.is_ok());
    }

    #[tokio::test]
    async fn test_disjoint_keys_do_not_block() {
        let table = LockTable::new();
        let _a = table
            .acquire([LockKey::Item(ItemId::new())], TIMEOUT)
            .await
            .unwrap();
        assert!(
            table
                .acquire([LockKey::Item(ItemId::new())], Duration::from_millis(20))
                .await
                .is_ok()
        );
    }
}
