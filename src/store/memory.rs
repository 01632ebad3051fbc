//! In-memory transactional store
//!
//! All state lives behind one `RwLock`. Reads take the read lock for the
//! duration of a clone; a commit takes the write lock, verifies every
//! staged version, then applies writes while recording an undo journal.
//! If any write fails the journal is replayed in reverse before the lock
//! is released.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use super::{
    ChangeSet, CommitReceipt, ExchangeStore, ItemQuery, Record, Staged, StoreError, SwapQuery,
};
use crate::core_types::{ItemId, Points, SwapId, UserId};
use crate::items::Item;
use crate::ledger::LedgerEntry;
use crate::swap::SwapRequest;
use crate::user_account::User;

#[derive(Debug, Default)]
struct StoreState {
    users: FxHashMap<UserId, User>,
    items: FxHashMap<ItemId, Item>,
    swaps: FxHashMap<SwapId, SwapRequest>,
    entries: Vec<LedgerEntry>,
    balances: FxHashMap<UserId, Points>,
    seq: u64,
}

/// Inverse of one applied write
enum Undo {
    User(UserId, Option<User>),
    Item(ItemId, Option<Item>),
    Swap(SwapId, Option<SwapRequest>),
    Entry,
    Balance(UserId, Option<Points>),
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    #[cfg(test)]
    faults: std::sync::Mutex<faults::FaultPlan>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn apply(
        state: &mut StoreState,
        changes: ChangeSet,
        journal: &mut Vec<Undo>,
        fail_after: Option<usize>,
    ) -> Result<(), StoreError> {
        let check_fault = |applied: usize| -> Result<(), StoreError> {
            match fail_after {
                Some(limit) if applied >= limit => Err(StoreError::Unavailable(format!(
                    "injected failure after {} writes",
                    applied
                ))),
                _ => Ok(()),
            }
        };
        let mut applied = 0usize;

        // Ledger first: an overdraft aborts before any entity changes
        for entry in changes.entries {
            check_fault(applied)?;
            if let Some(from) = entry.from {
                let balance = state.balances.get(&from).copied().unwrap_or(0);
                if balance < entry.amount {
                    return Err(StoreError::NegativeBalance {
                        user: from,
                        balance,
                        debit: entry.amount,
                    });
                }
                journal.push(Undo::Balance(from, state.balances.get(&from).copied()));
                state.balances.insert(from, balance - entry.amount);
            }
            let to_balance = state.balances.get(&entry.to).copied();
            let credited = to_balance
                .unwrap_or(0)
                .checked_add(entry.amount)
                .ok_or_else(|| StoreError::Unavailable("balance overflow".to_string()))?;
            journal.push(Undo::Balance(entry.to, to_balance));
            state.balances.insert(entry.to, credited);

            state.entries.push(entry);
            journal.push(Undo::Entry);
            applied += 1;
        }

        for (id, staged) in changes.users {
            check_fault(applied)?;
            let old = put(&mut state.users, staged);
            journal.push(Undo::User(id, old));
            applied += 1;
        }
        for (id, staged) in changes.items {
            check_fault(applied)?;
            let old = put(&mut state.items, staged);
            journal.push(Undo::Item(id, old));
            applied += 1;
        }
        for (id, staged) in changes.swaps {
            check_fault(applied)?;
            let old = put(&mut state.swaps, staged);
            journal.push(Undo::Swap(id, old));
            applied += 1;
        }

        Ok(())
    }

    fn rollback(state: &mut StoreState, journal: Vec<Undo>) {
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::User(id, old) => restore(&mut state.users, id, old),
                Undo::Item(id, old) => restore(&mut state.items, id, old),
                Undo::Swap(id, old) => restore(&mut state.swaps, id, old),
                Undo::Entry => {
                    state.entries.pop();
                }
                Undo::Balance(id, old) => restore(&mut state.balances, id, old),
            }
        }
    }
}

fn check_version<T: Record>(
    map: &FxHashMap<T::Id, T>,
    staged: &Staged<T>,
) -> Result<(), StoreError> {
    let current = map.get(&staged.record.record_id());
    match (staged.expected_version, current) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(StoreError::AlreadyExists {
            entity: staged.record.label(),
        }),
        (Some(_), None) => Err(StoreError::Missing {
            entity: staged.record.label(),
        }),
        (Some(expected), Some(found)) if found.version() != expected => {
            Err(StoreError::VersionConflict {
                entity: staged.record.label(),
                expected,
                found: found.version(),
            })
        }
        (Some(_), Some(_)) => Ok(()),
    }
}

fn put<T: Record>(map: &mut FxHashMap<T::Id, T>, staged: Staged<T>) -> Option<T> {
    let mut record = staged.record;
    record.set_version(staged.expected_version.map_or(1, |v| v + 1));
    map.insert(record.record_id(), record)
}

fn restore<K: std::hash::Hash + Eq, V>(map: &mut FxHashMap<K, V>, key: K, old: Option<V>) {
    match old {
        Some(v) => {
            map.insert(key, v);
        }
        None => {
            map.remove(&key);
        }
    }
}

#[async_trait]
impl ExchangeStore for InMemoryStore {
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        Ok(self.read()?.items.get(&id).cloned())
    }

    async fn swap(&self, id: SwapId) -> Result<Option<SwapRequest>, StoreError> {
        Ok(self.read()?.swaps.get(&id).cloned())
    }

    async fn balance_of(&self, user: UserId) -> Result<Points, StoreError> {
        Ok(self.read()?.balances.get(&user).copied().unwrap_or(0))
    }

    async fn users(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.read()?.users.values().cloned().collect();
        users.sort_by_key(|u| (u.joined_at(), u.id()));
        Ok(users)
    }

    async fn items(&self, query: ItemQuery) -> Result<Vec<Item>, StoreError> {
        let mut items: Vec<Item> = self
            .read()?
            .items
            .values()
            .filter(|i| query.matches(i))
            .cloned()
            .collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        Ok(items)
    }

    async fn swaps(&self, query: SwapQuery) -> Result<Vec<SwapRequest>, StoreError> {
        let mut swaps: Vec<SwapRequest> = self
            .read()?
            .swaps
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        swaps.sort_by_key(|s| (s.created_at, s.id));
        Ok(swaps)
    }

    async fn entries(&self, user: Option<UserId>) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.read()?;
        Ok(match user {
            Some(u) => state
                .entries
                .iter()
                .filter(|e| e.to == u || e.from == Some(u))
                .cloned()
                .collect(),
            None => state.entries.clone(),
        })
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        #[cfg(test)]
        let fail_after = self.before_commit().await?;
        #[cfg(not(test))]
        let fail_after: Option<usize> = None;

        let writes = changes.write_count();
        let mut state = self.write()?;

        for staged in changes.users.values() {
            check_version(&state.users, staged)?;
        }
        for staged in changes.items.values() {
            check_version(&state.items, staged)?;
        }
        for staged in changes.swaps.values() {
            check_version(&state.swaps, staged)?;
        }

        let mut journal = Vec::with_capacity(writes * 2);
        if let Err(e) = Self::apply(&mut state, changes, &mut journal, fail_after) {
            warn!(error = %e, undo = journal.len(), "Commit failed, rolling back");
            Self::rollback(&mut state, journal);
            return Err(e);
        }

        state.seq += 1;
        debug!(seq = state.seq, writes, "Commit applied");
        Ok(CommitReceipt {
            writes,
            seq: state.seq,
        })
    }
}
