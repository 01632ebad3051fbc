//! Unit of work
//!
//! A [`Transaction`] reads through to the store and stages every write in a
//! [`ChangeSet`]. Reads see the transaction's own staged writes. Nothing is
//! visible to anyone else until [`Transaction::commit`] succeeds, so a
//! failed business operation leaves storage untouched.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{ChangeSet, CommitReceipt, ExchangeStore, ItemQuery, Record, Staged, SwapQuery};
use crate::core_types::{ItemId, Points, SwapId, UserId};
use crate::error::ExchangeError;
use crate::items::Item;
use crate::ledger::LedgerEntry;
use crate::swap::SwapRequest;
use crate::user_account::User;

pub struct Transaction<'s> {
    store: &'s dyn ExchangeStore,
    changes: ChangeSet,
    now: DateTime<Utc>,
}

impl<'s> Transaction<'s> {
    pub fn begin(store: &'s dyn ExchangeStore) -> Self {
        Self {
            store,
            changes: ChangeSet::default(),
            now: Utc::now(),
        }
    }

    /// Single timestamp for every record this transaction touches
    #[inline]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    // ============================================================
    // READS (staged writes win over stored state)
    // ============================================================

    pub async fn find_user(&self, id: UserId) -> Result<Option<User>, ExchangeError> {
        if let Some(staged) = self.changes.users.get(&id) {
            return Ok(Some(staged.record.clone()));
        }
        Ok(self.store.user(id).await?)
    }

    pub async fn user(&self, id: UserId) -> Result<User, ExchangeError> {
        self.find_user(id)
            .await?
            .ok_or_else(|| ExchangeError::not_found("user", id))
    }

    pub async fn item(&self, id: ItemId) -> Result<Item, ExchangeError> {
        if let Some(staged) = self.changes.items.get(&id) {
            return Ok(staged.record.clone());
        }
        self.store
            .item(id)
            .await?
            .ok_or_else(|| ExchangeError::not_found("item", id))
    }

    pub async fn swap(&self, id: SwapId) -> Result<SwapRequest, ExchangeError> {
        if let Some(staged) = self.changes.swaps.get(&id) {
            return Ok(staged.record.clone());
        }
        self.store
            .swap(id)
            .await?
            .ok_or_else(|| ExchangeError::not_found("swap request", id))
    }

    pub async fn items(&self, query: ItemQuery) -> Result<Vec<Item>, ExchangeError> {
        let stored = self.store.items(query).await?;
        Ok(overlay(stored, &self.changes.items, |i| query.matches(i)))
    }

    pub async fn swaps(&self, query: SwapQuery) -> Result<Vec<SwapRequest>, ExchangeError> {
        let stored = self.store.swaps(query).await?;
        Ok(overlay(stored, &self.changes.swaps, |s| query.matches(s)))
    }

    /// Committed balance plus the effect of entries staged in this transaction
    pub async fn balance_of(&self, user: UserId) -> Result<Points, ExchangeError> {
        let committed = self.store.balance_of(user).await? as i128;
        let staged: i128 = self.changes.entries.iter().map(|e| e.delta_for(user)).sum();
        Points::try_from(committed + staged).map_err(|_| {
            warn!(user_id = %user, committed = %committed, staged = %staged, "Staged entries overdraw balance");
            ExchangeError::Conflict {
                resource: format!("balance of user {}", user),
            }
        })
    }

    // ============================================================
    // STAGED WRITES
    // ============================================================

    pub fn stage_user(&mut self, user: User) {
        stage(&mut self.changes.users, user);
    }

    pub fn stage_item(&mut self, item: Item) {
        stage(&mut self.changes.items, item);
    }

    pub fn stage_swap(&mut self, swap: SwapRequest) {
        stage(&mut self.changes.swaps, swap);
    }

    pub fn append_entry(&mut self, entry: LedgerEntry) {
        self.changes.entries.push(entry);
    }

    /// Hand the change set to the store, bounded by `timeout`
    pub async fn commit(self, timeout: Duration) -> Result<CommitReceipt, ExchangeError> {
        if self.changes.is_empty() {
            return Ok(CommitReceipt { writes: 0, seq: 0 });
        }
        let writes = self.changes.write_count();
        debug!(writes, "Committing transaction");

        match tokio::time::timeout(timeout, self.store.commit(self.changes)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ExchangeError::StorageUnavailable(format!(
                "commit timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

/// Version 0 marks a record that was never persisted; the store assigns 1 on insert.
fn stage<T: Record>(map: &mut BTreeMap<T::Id, Staged<T>>, record: T) {
    let id = record.record_id();
    let expected_version = match map.get(&id) {
        Some(existing) => existing.expected_version,
        None if record.version() == 0 => None,
        None => Some(record.version()),
    };
    map.insert(
        id,
        Staged {
            record,
            expected_version,
        },
    );
}

fn overlay<T: Record>(
    stored: Vec<T>,
    staged: &BTreeMap<T::Id, Staged<T>>,
    keep: impl Fn(&T) -> bool,
) -> Vec<T> {
    let mut out: Vec<T> = stored
        .into_iter()
        .filter(|r| !staged.contains_key(&r.record_id()))
        .collect();
    out.extend(staged.values().map(|s| s.record.clone()));
    out.retain(|r| keep(r));
    out
}
