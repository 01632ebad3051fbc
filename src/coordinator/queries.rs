//! Read models
//!
//! Queries take no locks and read committed state only.

use rustc_hash::FxHashMap;
use serde::Serialize;

use super::ExchangeCoordinator;
use crate::core_types::{ItemId, Points, SwapId, UserId};
use crate::error::ExchangeError;
use crate::identity::Actor;
use crate::items::{Item, ItemState};
use crate::ledger::{AuditReport, LedgerEntry, audit};
use crate::moderation::ModerationGate;
use crate::store::{ItemQuery, SwapQuery};
use crate::swap::{SwapRequest, SwapState};
use crate::user_account::User;

/// Everything a member's dashboard shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub user: User,
    pub balance: Points,
    pub items: Vec<Item>,
    pub sent_requests: Vec<SwapRequest>,
    pub received_requests: Vec<SwapRequest>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlatformStats {
    pub total_users: usize,
    pub total_items: usize,
    pub pending_items: usize,
    pub total_swaps: usize,
    pub pending_swaps: usize,
    pub completed_swaps: usize,
}

impl ExchangeCoordinator {
    pub async fn balance_of(&self, user: UserId) -> Result<Points, ExchangeError> {
        Ok(self.store.balance_of(user).await?)
    }

    pub async fn user(&self, id: UserId) -> Result<User, ExchangeError> {
        self.store
            .user(id)
            .await?
            .ok_or_else(|| ExchangeError::not_found("user", id))
    }

    pub async fn item(&self, id: ItemId) -> Result<Item, ExchangeError> {
        self.store
            .item(id)
            .await?
            .ok_or_else(|| ExchangeError::not_found("item", id))
    }

    pub async fn swap(&self, id: SwapId) -> Result<SwapRequest, ExchangeError> {
        self.store
            .swap(id)
            .await?
            .ok_or_else(|| ExchangeError::not_found("swap request", id))
    }

    pub async fn items_by_owner(&self, owner: UserId) -> Result<Vec<Item>, ExchangeError> {
        Ok(self.store.items(ItemQuery::by_owner(owner)).await?)
    }

    /// Browsable listings, featured first
    pub async fn available_items(&self) -> Result<Vec<Item>, ExchangeError> {
        let mut items = self
            .store
            .items(ItemQuery::in_state(ItemState::Available))
            .await?;
        // stable: keeps creation order within each group
        items.sort_by_key(|i| !i.featured);
        Ok(items)
    }

    pub async fn requests_sent(&self, user: UserId) -> Result<Vec<SwapRequest>, ExchangeError> {
        Ok(self
            .store
            .swaps(SwapQuery {
                requester: Some(user),
                ..Default::default()
            })
            .await?)
    }

    pub async fn requests_received(&self, user: UserId) -> Result<Vec<SwapRequest>, ExchangeError> {
        Ok(self
            .store
            .swaps(SwapQuery {
                owner: Some(user),
                ..Default::default()
            })
            .await?)
    }

    pub async fn user_profile(&self, id: UserId) -> Result<UserProfile, ExchangeError> {
        Ok(UserProfile {
            user: self.user(id).await?,
            balance: self.balance_of(id).await?,
            items: self.items_by_owner(id).await?,
            sent_requests: self.requests_sent(id).await?,
            received_requests: self.requests_received(id).await?,
        })
    }

    pub async fn ledger_history(&self, user: UserId) -> Result<Vec<LedgerEntry>, ExchangeError> {
        Ok(self.store.entries(Some(user)).await?)
    }

    /// Replay the whole ledger and compare with the cached balances
    pub async fn audit(&self) -> Result<AuditReport, ExchangeError> {
        let entries = self.store.entries(None).await?;
        let mut cached: FxHashMap<UserId, Points> = FxHashMap::default();
        for entry in &entries {
            for user in entry.from.into_iter().chain(Some(entry.to)) {
                if !cached.contains_key(&user) {
                    cached.insert(user, self.store.balance_of(user).await?);
                }
            }
        }
        Ok(audit(&entries, |user| cached.get(&user).copied().unwrap_or(0)))
    }

    // ============================================================
    // ADMIN DASHBOARD
    // ============================================================

    pub async fn list_users(&self, actor: &Actor) -> Result<Vec<User>, ExchangeError> {
        self.require_admin(actor).await?;
        Ok(self.store.users().await?)
    }

    pub async fn all_swaps(&self, actor: &Actor) -> Result<Vec<SwapRequest>, ExchangeError> {
        self.require_admin(actor).await?;
        Ok(self.store.swaps(SwapQuery::default()).await?)
    }

    pub async fn pending_items(&self, actor: &Actor) -> Result<Vec<Item>, ExchangeError> {
        self.require_admin(actor).await?;
        Ok(self
            .store
            .items(ItemQuery::in_state(ItemState::PendingApproval))
            .await?)
    }

    pub async fn platform_stats(&self, actor: &Actor) -> Result<PlatformStats, ExchangeError> {
        self.require_admin(actor).await?;
        let items = self.store.items(ItemQuery::default()).await?;
        let swaps = self.store.swaps(SwapQuery::default()).await?;
        Ok(PlatformStats {
            total_users: self.store.users().await?.len(),
            total_items: items.len(),
            pending_items: items
                .iter()
                .filter(|i| i.state == ItemState::PendingApproval)
                .count(),
            total_swaps: swaps.len(),
            pending_swaps: swaps.iter().filter(|s| s.state == SwapState::Pending).count(),
            completed_swaps: swaps
                .iter()
                .filter(|s| s.state == SwapState::Completed)
                .count(),
        })
    }

    async fn require_admin(&self, actor: &Actor) -> Result<User, ExchangeError> {
        let mut tx = self.begin();
        ModerationGate::new(&mut tx).require_admin(actor).await
    }
}
