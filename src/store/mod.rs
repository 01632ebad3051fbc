//! Persistence collaborator
//!
//! The core talks to storage through [`ExchangeStore`]: keyed reads plus one
//! atomic multi-entity [`commit`](ExchangeStore::commit). A commit either
//! applies every staged write or none of them.
//!
//! # Safety Invariants
//!
//! 1. **Optimistic CAS**: each staged record names the version it was read at;
//!    a mismatch rejects the whole change set (`VersionConflict`)
//! 2. **Non-negative balances**: ledger entries are re-checked against the
//!    authoritative balances at apply time
//! 3. **All-or-nothing**: a failure mid-apply is rolled back before the
//!    write lock is released, so readers never observe a partial commit

pub mod memory;
pub mod transaction;

pub use memory::InMemoryStore;
pub use transaction::Transaction;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::core_types::{ItemId, Points, SwapId, UserId};
use crate::error::ExchangeError;
use crate::items::{Item, ItemState};
use crate::ledger::LedgerEntry;
use crate::swap::SwapRequest;
use crate::user_account::User;

/// Store-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("{entity} changed concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        entity: String,
        expected: u64,
        found: u64,
    },

    #[error("{entity} already exists")]
    AlreadyExists { entity: String },

    #[error("{entity} does not exist")]
    Missing { entity: String },

    #[error("Entry would overdraw user {user}: balance {balance}, debit {debit}")]
    NegativeBalance {
        user: UserId,
        balance: Points,
        debit: Points,
    },
}

impl From<StoreError> for ExchangeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => ExchangeError::StorageUnavailable(msg),
            StoreError::VersionConflict { entity, .. }
            | StoreError::AlreadyExists { entity }
            | StoreError::Missing { entity } => ExchangeError::Conflict { resource: entity },
            StoreError::NegativeBalance {
                user,
                balance,
                debit,
            } => ExchangeError::InsufficientFunds {
                user,
                balance,
                required: debit,
            },
        }
    }
}

/// A persisted, versioned entity
pub trait Record: Clone + Send + Sync {
    type Id: Ord + Copy + std::hash::Hash + fmt::Display + Send + Sync;
    const KIND: &'static str;

    fn record_id(&self) -> Self::Id;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);

    fn label(&self) -> String {
        format!("{} {}", Self::KIND, self.record_id())
    }
}

impl Record for User {
    type Id = UserId;
    const KIND: &'static str = "user";

    fn record_id(&self) -> UserId {
        self.id()
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Record for Item {
    type Id = ItemId;
    const KIND: &'static str = "item";

    fn record_id(&self) -> ItemId {
        self.id
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Record for SwapRequest {
    type Id = SwapId;
    const KIND: &'static str = "swap";

    fn record_id(&self) -> SwapId {
        self.id
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// A record staged for commit
#[derive(Debug, Clone)]
pub struct Staged<T> {
    pub record: T,
    /// `None` = insert; `Some(v)` = update, only if the stored version is still `v`
    pub expected_version: Option<u64>,
}

/// Everything one business operation writes
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub users: BTreeMap<UserId, Staged<User>>,
    pub items: BTreeMap<ItemId, Staged<Item>>,
    pub swaps: BTreeMap<SwapId, Staged<SwapRequest>>,
    pub entries: Vec<LedgerEntry>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.items.is_empty()
            && self.swaps.is_empty()
            && self.entries.is_empty()
    }

    /// Number of individual writes the store will apply
    pub fn write_count(&self) -> usize {
        self.users.len() + self.items.len() + self.swaps.len() + self.entries.len()
    }
}

/// Result of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub writes: usize,
    /// Monotonic commit sequence number
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemQuery {
    pub owner: Option<UserId>,
    pub state: Option<ItemState>,
    pub featured: Option<bool>,
}

impl ItemQuery {
    pub fn by_owner(owner: UserId) -> Self {
        Self {
            owner: Some(owner),
            ..Default::default()
        }
    }

    pub fn in_state(state: ItemState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn matches(&self, item: &Item) -> bool {
        self.owner.is_none_or(|o| item.owner == o)
            && self.state.is_none_or(|s| item.state == s)
            && self.featured.is_none_or(|f| item.featured == f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapQuery {
    pub item: Option<ItemId>,
    pub requester: Option<UserId>,
    pub owner: Option<UserId>,
    /// Requests where the user is either side
    pub participant: Option<UserId>,
    pub open_only: bool,
}

impl SwapQuery {
    pub fn open_for_item(item: ItemId) -> Self {
        Self {
            item: Some(item),
            open_only: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, swap: &SwapRequest) -> bool {
        self.item.is_none_or(|i| swap.item == i)
            && self.requester.is_none_or(|r| swap.requester == r)
            && self.owner.is_none_or(|o| swap.owner == o)
            && self.participant.is_none_or(|p| swap.involves(p))
            && (!self.open_only || swap.state.is_open())
    }
}

/// Storage backend for the exchange
///
/// Reads never block on writers for longer than a single commit apply.
#[async_trait]
pub trait ExchangeStore: Send + Sync {
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError>;

    async fn swap(&self, id: SwapId) -> Result<Option<SwapRequest>, StoreError>;

    /// Cached running total, maintained in the same commit as each entry
    async fn balance_of(&self, user: UserId) -> Result<Points, StoreError>;

    async fn users(&self) -> Result<Vec<User>, StoreError>;

    /// Matching items, oldest first
    async fn items(&self, query: ItemQuery) -> Result<Vec<Item>, StoreError>;

    /// Matching swap requests, oldest first
    async fn swaps(&self, query: SwapQuery) -> Result<Vec<SwapRequest>, StoreError>;

    /// Ledger entries touching `user` (all entries when `None`), in append order
    async fn entries(&self, user: Option<UserId>) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Apply a change set atomically
    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError>;
}
