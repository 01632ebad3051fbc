//! Exchange Coordinator
//!
//! The single entry point for boundary operations. Each mutation follows the
//! same shape:
//!
//! 1. acquire the item/user locks it needs (sorted, bounded by a timeout)
//! 2. open a [`Transaction`] and run the components against it
//! 3. commit the staged change set in one store call
//!
//! A failure at any step drops the transaction, so nothing becomes visible.
//! Locks release when the guard leaves scope.

mod queries;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

pub use queries::{PlatformStats, UserProfile};

use crate::config::ExchangeConfig;
use crate::core_types::{ItemId, Points, Reference, SwapId, UserId};
use crate::error::ExchangeError;
use crate::identity::Actor;
use crate::items::{Item, ItemDraft, ItemPatch, ItemRegistry};
use crate::ledger::{Ledger, LedgerEntry, TransferReason};
use crate::locks::{LockGuard, LockKey, LockTable};
use crate::moderation::{BanReport, ModerationGate};
use crate::store::{CommitReceipt, ExchangeStore, ItemQuery, SwapQuery, Transaction};
use crate::swap::{SwapRequest, SwapState, SwapWorkflow};
use crate::user_account::User;

/// Result of a point redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redemption {
    pub item: Item,
    pub entry: LedgerEntry,
}

/// Result of settling a swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settlement {
    pub swap: SwapRequest,
    pub item: Item,
}

const BAN_SCOPE_ATTEMPTS: usize = 3;

pub struct ExchangeCoordinator {
    store: Arc<dyn ExchangeStore>,
    locks: LockTable,
    config: ExchangeConfig,
}

impl ExchangeCoordinator {
    pub fn new(store: Arc<dyn ExchangeStore>, config: ExchangeConfig) -> Self {
        Self {
            store,
            locks: LockTable::new(),
            config,
        }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ExchangeStore> {
        &self.store
    }

    // ============================================================
    // USERS & POINTS
    // ============================================================

    /// Register a member; the configured signup bonus is issued in the same commit
    pub async fn register_user(
        &self,
        display_name: &str,
        credential_ref: &str,
    ) -> Result<User, ExchangeError> {
        let result = async {
            let mut tx = self.begin();
            let user = User::register(display_name, credential_ref, tx.now())?;
            tx.stage_user(user.clone());
            if self.config.signup_bonus > 0 {
                Ledger::new(&mut tx).issue(
                    user.id(),
                    self.config.signup_bonus,
                    Reference::User(user.id()),
                )?;
            }
            self.finish(tx).await?;
            info!(user_id = %user.id(), bonus = self.config.signup_bonus, "User registered");
            Ok::<_, ExchangeError>(user)
        }
        .await;
        logged("register_user", result)
    }

    /// Create the first administrator; refused once any admin exists
    pub async fn bootstrap_admin(
        &self,
        display_name: &str,
        credential_ref: &str,
    ) -> Result<User, ExchangeError> {
        let result = async {
            let _guard = self.lock([LockKey::Bootstrap]).await?;
            if self.store.users().await?.iter().any(|u| u.is_admin()) {
                return Err(ExchangeError::forbidden("an administrator already exists"));
            }
            let mut tx = self.begin();
            let mut user = User::register(display_name, credential_ref, tx.now())?;
            user.set_admin(true);
            tx.stage_user(user.clone());
            self.finish(tx).await?;
            info!(user_id = %user.id(), "Administrator bootstrapped");
            Ok::<_, ExchangeError>(user)
        }
        .await;
        logged("bootstrap_admin", result)
    }

    /// Admin issuance: points enter the system
    pub async fn grant_points(
        &self,
        actor: &Actor,
        to: UserId,
        amount: Points,
    ) -> Result<LedgerEntry, ExchangeError> {
        let result = async {
            let _guard = self.lock([LockKey::User(to)]).await?;
            let mut tx = self.begin();
            ModerationGate::new(&mut tx).require_admin(actor).await?;
            tx.user(to).await?;
            let entry = Ledger::new(&mut tx).issue(to, amount, Reference::User(to))?;
            self.finish(tx).await?;
            info!(admin = %actor.user_id, user_id = %to, amount, "Points granted");
            Ok::<_, ExchangeError>(entry)
        }
        .await;
        logged("grant_points", result)
    }

    /// Admin correction: move points between members as an `adjustment` entry
    ///
    /// Entries are never edited, so a misdirected grant or redemption is
    /// reversed by a new entry. Issued supply does not shrink.
    pub async fn correct_points(
        &self,
        actor: &Actor,
        from: UserId,
        to: UserId,
        amount: Points,
    ) -> Result<LedgerEntry, ExchangeError> {
        let result = async {
            let _guard = self.lock([LockKey::User(from), LockKey::User(to)]).await?;
            let mut tx = self.begin();
            ModerationGate::new(&mut tx).require_admin(actor).await?;
            tx.user(from).await?;
            tx.user(to).await?;
            let entry = Ledger::new(&mut tx)
                .record_transfer(
                    from,
                    to,
                    amount,
                    TransferReason::Adjustment,
                    Reference::User(from),
                )
                .await?;
            self.finish(tx).await?;
            info!(admin = %actor.user_id, from = %from, to = %to, amount, "Points corrected");
            Ok::<_, ExchangeError>(entry)
        }
        .await;
        logged("correct_points", result)
    }

    // ============================================================
    // ITEMS
    // ============================================================

    pub async fn create_item(&self, actor: &Actor, draft: ItemDraft) -> Result<Item, ExchangeError> {
        let result = async {
            let _guard = self.lock([LockKey::User(actor.user_id)]).await?;
            let mut tx = self.begin();
            let owner = active_user(&tx, actor).await?;
            let item = ItemRegistry::new(&mut tx).create(owner.id(), draft)?;
            self.finish(tx).await?;
            info!(item_id = %item.id, owner = %owner.id(), points = item.points_required, "Item listed");
            Ok::<_, ExchangeError>(item)
        }
        .await;
        logged("create_item", result)
    }

    pub async fn update_item(
        &self,
        actor: &Actor,
        item_id: ItemId,
        patch: ItemPatch,
    ) -> Result<Item, ExchangeError> {
        let result = async {
            let _guard = self.lock([LockKey::Item(item_id)]).await?;
            let mut tx = self.begin();
            active_user(&tx, actor).await?;
            require_owner(&tx.item(item_id).await?, actor)?;
            let item = ItemRegistry::new(&mut tx).update(item_id, patch).await?;
            self.finish(tx).await?;
            info!(item_id = %item_id, "Item updated");
            Ok::<_, ExchangeError>(item)
        }
        .await;
        logged("update_item", result)
    }

    /// Owner removes a listing; any open request is declined in the same commit
    pub async fn withdraw_item(&self, actor: &Actor, item_id: ItemId) -> Result<Item, ExchangeError> {
        let result = async {
            let _guard = self.lock([LockKey::Item(item_id)]).await?;
            let mut tx = self.begin();
            active_user(&tx, actor).await?;
            require_owner(&tx.item(item_id).await?, actor)?;
            let item = ItemRegistry::new(&mut tx).withdraw(item_id).await?;
            self.finish(tx).await?;
            info!(item_id = %item_id, "Item withdrawn");
            Ok::<_, ExchangeError>(item)
        }
        .await;
        logged("withdraw_item", result)
    }

    pub async fn approve_item(&self, actor: &Actor, item_id: ItemId) -> Result<Item, ExchangeError> {
        let result = async {
            let _guard = self.lock([LockKey::Item(item_id)]).await?;
            let mut tx = self.begin();
            let item = ModerationGate::new(&mut tx)
                .approve_item(actor, item_id)
                .await?;
            self.finish(tx).await?;
            info!(item_id = %item_id, admin = %actor.user_id, "Item approved");
            Ok::<_, ExchangeError>(item)
        }
        .await;
        logged("approve_item", result)
    }

    pub async fn reject_item(&self, actor: &Actor, item_id: ItemId) -> Result<Item, ExchangeError> {
        let result = async {
            let _guard = self.lock([LockKey::Item(item_id)]).await?;
            let mut tx = self.begin();
            let item = ModerationGate::new(&mut tx)
                .reject_item(actor, item_id)
                .await?;
            self.finish(tx).await?;
            info!(item_id = %item_id, admin = %actor.user_id, "Item rejected");
            Ok::<_, ExchangeError>(item)
        }
        .await;
        logged("reject_item", result)
    }

    pub async fn set_featured(
        &self,
        actor: &Actor,
        item_id: ItemId,
        featured: bool,
    ) -> Result<Item, ExchangeError> {
        let result = async {
            let _guard = self.lock([LockKey::Item(item_id)]).await?;
            let mut tx = self.begin();
            let item = ModerationGate::new(&mut tx)
                .set_featured(actor, item_id, featured)
                .await?;
            self.finish(tx).await?;
            info!(item_id = %item_id, featured, "Item curation changed");
            Ok::<_, ExchangeError>(item)
        }
        .await;
        logged("set_featured", result)
    }

    // ============================================================
    // SWAPS
    // ============================================================

    pub async fn create_swap_request(
        &self,
        actor: &Actor,
        item_id: ItemId,
        message: &str,
    ) -> Result<SwapRequest, ExchangeError> {
        let result = async {
            let _guard = self
                .lock([LockKey::Item(item_id), LockKey::User(actor.user_id)])
                .await?;
            let mut tx = self.begin();
            let requester = active_user(&tx, actor).await?;
            let swap = self
                .workflow(&mut tx)
                .create_request(item_id, requester.id(), message)
                .await?;
            self.finish(tx).await?;
            info!(swap_id = %swap.id, item_id = %item_id, requester = %requester.id(), "Swap requested");
            Ok::<_, ExchangeError>(swap)
        }
        .await;
        logged("create_swap_request", result)
    }

    /// Owner accepts or declines a pending request
    pub async fn respond_to_swap(
        &self,
        actor: &Actor,
        swap_id: SwapId,
        accept: bool,
    ) -> Result<SwapRequest, ExchangeError> {
        let result = async {
            let _guard = self.lock_swap_item(swap_id).await?;
            let mut tx = self.begin();
            let owner = active_user(&tx, actor).await?;
            let swap = self
                .workflow(&mut tx)
                .respond(swap_id, owner.id(), accept)
                .await?;
            self.finish(tx).await?;
            info!(swap_id = %swap_id, state = %swap.state, "Swap answered");
            Ok::<_, ExchangeError>(swap)
        }
        .await;
        logged("respond_to_swap", result)
    }

    pub async fn cancel_swap(&self, actor: &Actor, swap_id: SwapId) -> Result<SwapRequest, ExchangeError> {
        let result = async {
            let _guard = self.lock_swap_item(swap_id).await?;
            let mut tx = self.begin();
            let requester = active_user(&tx, actor).await?;
            let swap = self.workflow(&mut tx).cancel(swap_id, requester.id()).await?;
            self.finish(tx).await?;
            info!(swap_id = %swap_id, "Swap cancelled");
            Ok::<_, ExchangeError>(swap)
        }
        .await;
        logged("cancel_swap", result)
    }

    /// Complete a swap; the item becomes SWAPPED. No points move.
    ///
    /// Either party may settle an ACCEPTED request. The owner may also settle
    /// a PENDING one directly, which accepts and completes in one commit.
    pub async fn accept_swap_and_settle(
        &self,
        actor: &Actor,
        swap_id: SwapId,
    ) -> Result<Settlement, ExchangeError> {
        let result = async {
            let _guard = self.lock_swap_item(swap_id).await?;
            let mut tx = self.begin();
            let user = active_user(&tx, actor).await?;
            let current = tx.swap(swap_id).await?;
            if !current.involves(user.id()) {
                return Err(ExchangeError::forbidden(
                    "only the parties of a swap may settle it",
                ));
            }

            let mut workflow = self.workflow(&mut tx);
            if current.state == SwapState::Pending {
                workflow.respond(swap_id, user.id(), true).await?;
            }
            let swap = workflow.complete(swap_id).await?;
            let item = tx.item(swap.item).await?;
            self.finish(tx).await?;
            info!(swap_id = %swap_id, item_id = %item.id, "Swap settled");
            Ok::<_, ExchangeError>(Settlement { swap, item })
        }
        .await;
        logged("accept_swap_and_settle", result)
    }

    // ============================================================
    // REDEMPTION
    // ============================================================

    /// Buy an available item with points: one ledger entry and the item
    /// transition, committed together
    ///
    /// # Errors
    /// Checked in order: `SelfRedemptionNotAllowed`, `ItemNotAvailable`,
    /// `InsufficientFunds`.
    pub async fn redeem_with_points(
        &self,
        actor: &Actor,
        item_id: ItemId,
    ) -> Result<Redemption, ExchangeError> {
        let result = async {
            let _guard = self
                .lock([LockKey::Item(item_id), LockKey::User(actor.user_id)])
                .await?;
            let mut tx = self.begin();
            let buyer = active_user(&tx, actor).await?;
            let item = tx.item(item_id).await?;
            if item.owner == buyer.id() {
                return Err(ExchangeError::SelfRedemptionNotAllowed { item: item_id });
            }
            if !item.is_exchangeable() {
                return Err(ExchangeError::ItemNotAvailable {
                    item: item_id,
                    state: item.state.to_string(),
                });
            }

            let entry = Ledger::new(&mut tx)
                .record_transfer(
                    buyer.id(),
                    item.owner,
                    item.points_required,
                    TransferReason::Redemption,
                    Reference::Item(item_id),
                )
                .await?;
            let item = ItemRegistry::new(&mut tx).mark_swapped(item_id).await?;
            self.finish(tx).await?;
            info!(
                item_id = %item_id,
                buyer = %buyer.id(),
                owner = %item.owner,
                points = entry.amount,
                "Item redeemed"
            );
            Ok::<_, ExchangeError>(Redemption { item, entry })
        }
        .await;
        logged("redeem_with_points", result)
    }

    // ============================================================
    // MODERATION
    // ============================================================

    pub async fn ban_user(&self, actor: &Actor, target: UserId) -> Result<BanReport, ExchangeError> {
        let result = async {
            let _guard = self.lock_ban_scope(target).await?;
            let mut tx = self.begin();
            let report = ModerationGate::new(&mut tx).ban_user(actor, target).await?;
            self.finish(tx).await?;
            info!(
                user_id = %target,
                admin = %actor.user_id,
                swaps = report.declined_swaps.len(),
                items = report.rejected_items.len(),
                "User banned"
            );
            Ok::<_, ExchangeError>(report)
        }
        .await;
        logged("ban_user", result)
    }

    pub async fn unban_user(&self, actor: &Actor, target: UserId) -> Result<User, ExchangeError> {
        let result = async {
            let _guard = self.lock([LockKey::User(target)]).await?;
            let mut tx = self.begin();
            let user = ModerationGate::new(&mut tx).unban_user(actor, target).await?;
            self.finish(tx).await?;
            info!(user_id = %target, admin = %actor.user_id, "User unbanned");
            Ok::<_, ExchangeError>(user)
        }
        .await;
        logged("unban_user", result)
    }

    pub async fn set_admin(
        &self,
        actor: &Actor,
        target: UserId,
        is_admin: bool,
    ) -> Result<User, ExchangeError> {
        let result = async {
            let _guard = self.lock([LockKey::User(target)]).await?;
            let mut tx = self.begin();
            let user = ModerationGate::new(&mut tx)
                .set_admin(actor, target, is_admin)
                .await?;
            self.finish(tx).await?;
            Ok::<_, ExchangeError>(user)
        }
        .await;
        logged("set_admin", result)
    }

    // ============================================================
    // PLUMBING
    // ============================================================

    fn begin(&self) -> Transaction<'_> {
        Transaction::begin(self.store.as_ref())
    }

    async fn finish(&self, tx: Transaction<'_>) -> Result<CommitReceipt, ExchangeError> {
        tx.commit(self.config.commit_timeout()).await
    }

    async fn lock(
        &self,
        keys: impl IntoIterator<Item = LockKey>,
    ) -> Result<LockGuard, ExchangeError> {
        self.locks.acquire(keys, self.config.lock_timeout()).await
    }

    /// A request's item never changes, so it can be read before locking
    async fn lock_swap_item(&self, swap_id: SwapId) -> Result<LockGuard, ExchangeError> {
        let swap = self
            .store
            .swap(swap_id)
            .await?
            .ok_or_else(|| ExchangeError::not_found("swap request", swap_id))?;
        self.lock([LockKey::Item(swap.item)]).await
    }

    /// Lock the user plus every item a ban cascade may transition
    ///
    /// The item set is read before locking, so it is re-read once the locks
    /// are held; if it grew meanwhile the locks are dropped and taken again.
    async fn lock_ban_scope(&self, target: UserId) -> Result<LockGuard, ExchangeError> {
        for _ in 0..BAN_SCOPE_ATTEMPTS {
            let keys = self.ban_scope(target).await?;
            let guard = self.lock(keys.iter().copied()).await?;
            let now = self.ban_scope(target).await?;
            if now.iter().all(|k| guard.keys().contains(k)) {
                return Ok(guard);
            }
            debug!(user_id = %target, "Ban scope changed while locking, retrying");
        }
        Err(ExchangeError::Conflict {
            resource: format!("user {}", target),
        })
    }

    async fn ban_scope(&self, target: UserId) -> Result<Vec<LockKey>, ExchangeError> {
        let mut keys = vec![LockKey::User(target)];
        let open = self
            .store
            .swaps(SwapQuery {
                participant: Some(target),
                open_only: true,
                ..Default::default()
            })
            .await?;
        keys.extend(open.iter().map(|s| LockKey::Item(s.item)));
        let owned = self.store.items(ItemQuery::by_owner(target)).await?;
        keys.extend(
            owned
                .iter()
                .filter(|i| !i.state.is_terminal())
                .map(|i| LockKey::Item(i.id)),
        );
        Ok(keys)
    }

    fn workflow<'t, 's>(&self, tx: &'t mut Transaction<'s>) -> SwapWorkflow<'t, 's> {
        SwapWorkflow::with_message_limit(tx, self.config.max_message_len)
    }
}

/// The acting user as stored; banned users may not mutate anything
async fn active_user(tx: &Transaction<'_>, actor: &Actor) -> Result<User, ExchangeError> {
    let user = tx.user(actor.user_id).await?;
    if user.is_banned() {
        return Err(ExchangeError::forbidden("user is banned"));
    }
    Ok(user)
}

fn require_owner(item: &Item, actor: &Actor) -> Result<(), ExchangeError> {
    if item.owner != actor.user_id {
        return Err(ExchangeError::forbidden("only the owner may modify this item"));
    }
    Ok(())
}

fn logged<T>(op: &'static str, result: Result<T, ExchangeError>) -> Result<T, ExchangeError> {
    if let Err(e) = &result {
        warn!(op, code = e.code(), retryable = e.is_retryable(), error = %e, "Operation rejected");
    }
    result
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::items::{Condition, ItemState};
    use crate::store::InMemoryStore;

    struct Harness {
        store: Arc<InMemoryStore>,
        exchange: ExchangeCoordinator,
        admin: Actor,
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let exchange = ExchangeCoordinator::new(store.clone(), ExchangeConfig::default());
        let admin = Actor::from(&exchange.bootstrap_admin("admin", "cred").await.unwrap());
        Harness {
            store,
            exchange,
            admin,
        }
    }

    impl Harness {
        async fn member(&self, name: &str, points: Points) -> Actor {
            let user = self.exchange.register_user(name, "cred").await.unwrap();
            if points > 0 {
                self.exchange
                    .grant_points(&self.admin, user.id(), points)
                    .await
                    .unwrap();
            }
            Actor::from(&user)
        }

        async fn listed(&self, owner: &Actor, points: Points) -> ItemId {
            let item = self
                .exchange
                .create_item(
                    owner,
                    ItemDraft {
                        title: "Denim jacket".into(),
                        description: "Barely worn".into(),
                        category: "outerwear".into(),
                        size: "M".into(),
                        condition: Condition::Good,
                        tags: vec!["denim".into()],
                        points_required: points,
                    },
                )
                .await
                .unwrap();
            self.exchange.approve_item(&self.admin, item.id).await.unwrap();
            item.id
        }
    }

    #[tokio::test]
    async fn test_redeem_moves_points_and_item() {
        let h = harness().await;
        let a = h.member("alice", 0).await;
        let b = h.member("bob", 60).await;
        let x = h.listed(&a, 45).await;

        let redemption = h.exchange.redeem_with_points(&b, x).await.unwrap();
        assert_eq!(redemption.entry.from, Some(b.user_id));
        assert_eq!(redemption.entry.to, a.user_id);
        assert_eq!(redemption.entry.amount, 45);
        assert_eq!(redemption.entry.reason, TransferReason::Redemption);
        assert_eq!(redemption.item.state, ItemState::Swapped);

        assert_eq!(h.exchange.balance_of(a.user_id).await.unwrap(), 45);
        assert_eq!(h.exchange.balance_of(b.user_id).await.unwrap(), 15);

        // A swapped item cannot be redeemed again
        let c = h.member("carol", 100).await;
        assert!(matches!(
            h.exchange.redeem_with_points(&c, x).await,
            Err(ExchangeError::ItemNotAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_redeem_failure_mid_commit_rolls_back() {
        let h = harness().await;
        let a = h.member("alice", 0).await;
        let b = h.member("bob", 60).await;
        let x = h.listed(&a, 45).await;
        let entries_before = h.store.entries(None).await.unwrap().len();

        // Ledger entry applies, then the item write fails
        h.store.fail_next_commit_after(1);
        let err = h.exchange.redeem_with_points(&b, x).await.unwrap_err();
        assert!(matches!(err, ExchangeError::StorageUnavailable(_)));

        assert_eq!(h.store.entries(None).await.unwrap().len(), entries_before);
        assert_eq!(h.exchange.balance_of(a.user_id).await.unwrap(), 0);
        assert_eq!(h.exchange.balance_of(b.user_id).await.unwrap(), 60);
        assert_eq!(h.exchange.item(x).await.unwrap().state, ItemState::Available);

        // Retry succeeds once storage recovers
        assert!(h.exchange.redeem_with_points(&b, x).await.is_ok());
    }

    #[tokio::test]
    async fn test_redeem_insufficient_funds_changes_nothing() {
        let h = harness().await;
        let a = h.member("alice", 0).await;
        let b = h.member("bob", 10).await;
        let x = h.listed(&a, 45).await;
        let entries_before = h.store.entries(None).await.unwrap().len();

        assert_eq!(
            h.exchange.redeem_with_points(&b, x).await,
            Err(ExchangeError::InsufficientFunds {
                user: b.user_id,
                balance: 10,
                required: 45
            })
        );
        assert_eq!(h.store.entries(None).await.unwrap().len(), entries_before);
        assert_eq!(h.exchange.item(x).await.unwrap().state, ItemState::Available);
    }

    #[tokio::test]
    async fn test_self_redemption_checked_first() {
        let h = harness().await;
        let a = h.member("alice", 0).await;
        let x = h.listed(&a, 45).await;
        assert_eq!(
            h.exchange.redeem_with_points(&a, x).await,
            Err(ExchangeError::SelfRedemptionNotAllowed { item: x })
        );
    }

    #[tokio::test]
    async fn test_swap_decline_then_request_again() {
        let h = harness().await;
        let a = h.member("alice", 0).await;
        let b = h.member("bob", 0).await;
        let y = h.listed(&a, 30).await;

        let first = h.exchange.create_swap_request(&b, y, "trade?").await.unwrap();
        assert_eq!(h.exchange.item(y).await.unwrap().state, ItemState::PendingSwap);
        h.exchange.respond_to_swap(&a, first.id, false).await.unwrap();
        assert_eq!(h.exchange.item(y).await.unwrap().state, ItemState::Available);

        let second = h.exchange.create_swap_request(&b, y, "again?").await.unwrap();
        assert_eq!(second.state, SwapState::Pending);
    }

    #[tokio::test]
    async fn test_own_item_request_changes_nothing() {
        let h = harness().await;
        let a = h.member("alice", 0).await;
        let y = h.listed(&a, 30).await;

        assert_eq!(
            h.exchange.create_swap_request(&a, y, "").await,
            Err(ExchangeError::SelfSwapNotAllowed { item: y })
        );
        assert_eq!(h.exchange.item(y).await.unwrap().state, ItemState::Available);
        assert!(h.exchange.requests_sent(a.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settle_is_point_neutral() {
        let h = harness().await;
        let a = h.member("alice", 20).await;
        let b = h.member("bob", 20).await;
        let y = h.listed(&a, 30).await;

        let swap = h.exchange.create_swap_request(&b, y, "").await.unwrap();
        // The requester cannot accept on the owner's behalf
        assert!(matches!(
            h.exchange.accept_swap_and_settle(&b, swap.id).await,
            Err(ExchangeError::Forbidden { .. })
        ));
        h.exchange.respond_to_swap(&a, swap.id, true).await.unwrap();
        let settled = h.exchange.accept_swap_and_settle(&b, swap.id).await.unwrap();

        assert_eq!(settled.swap.state, SwapState::Completed);
        assert_eq!(settled.item.state, ItemState::Swapped);
        assert_eq!(h.exchange.balance_of(a.user_id).await.unwrap(), 20);
        assert_eq!(h.exchange.balance_of(b.user_id).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_owner_settles_pending_in_one_step() {
        let h = harness().await;
        let a = h.member("alice", 0).await;
        let b = h.member("bob", 0).await;
        let y = h.listed(&a, 30).await;
        let swap = h.exchange.create_swap_request(&b, y, "").await.unwrap();

        let settled = h.exchange.accept_swap_and_settle(&a, swap.id).await.unwrap();
        assert_eq!(settled.swap.state, SwapState::Completed);
        assert!(matches!(
            h.exchange.accept_swap_and_settle(&a, swap.id).await,
            Err(ExchangeError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_banned_user_cannot_mutate() {
        let h = harness().await;
        let a = h.member("alice", 0).await;
        let m = h.member("mallory", 100).await;
        let x = h.listed(&a, 10).await;
        let mine = h.listed(&m, 10).await;
        let swap = h.exchange.create_swap_request(&m, x, "").await.unwrap();

        let report = h.exchange.ban_user(&h.admin, m.user_id).await.unwrap();
        assert_eq!(report.declined_swaps, vec![swap.id]);
        assert_eq!(report.rejected_items, vec![mine]);
        assert_eq!(h.exchange.item(x).await.unwrap().state, ItemState::Available);
        assert_eq!(h.exchange.item(mine).await.unwrap().state, ItemState::Rejected);

        assert!(matches!(
            h.exchange.redeem_with_points(&m, x).await,
            Err(ExchangeError::Forbidden { .. })
        ));
        assert!(matches!(
            h.exchange.create_swap_request(&m, x, "").await,
            Err(ExchangeError::Forbidden { .. })
        ));

        h.exchange.unban_user(&h.admin, m.user_id).await.unwrap();
        assert!(h.exchange.redeem_with_points(&m, x).await.is_ok());
    }

    #[tokio::test]
    async fn test_withdraw_declines_open_request() {
        let h = harness().await;
        let a = h.member("alice", 0).await;
        let b = h.member("bob", 0).await;
        let y = h.listed(&a, 30).await;
        let swap = h.exchange.create_swap_request(&b, y, "").await.unwrap();

        assert!(matches!(
            h.exchange.withdraw_item(&b, y).await,
            Err(ExchangeError::Forbidden { .. })
        ));
        let item = h.exchange.withdraw_item(&a, y).await.unwrap();
        assert_eq!(item.state, ItemState::Withdrawn);
        assert_eq!(
            h.exchange.swap(swap.id).await.unwrap().state,
            SwapState::Declined
        );
    }

    #[tokio::test]
    async fn test_signup_bonus_is_issued() {
        let store = Arc::new(InMemoryStore::new());
        let config = ExchangeConfig {
            signup_bonus: 25,
            ..Default::default()
        };
        let exchange = ExchangeCoordinator::new(store, config);
        let user = exchange.register_user("dana", "cred").await.unwrap();

        assert_eq!(exchange.balance_of(user.id()).await.unwrap(), 25);
        let history = exchange.ledger_history(user.id()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_issuance());
    }

    #[tokio::test]
    async fn test_second_bootstrap_refused() {
        let h = harness().await;
        assert!(matches!(
            h.exchange.bootstrap_admin("other", "cred").await,
            Err(ExchangeError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_commit_outage_is_retryable() {
        let h = harness().await;
        let a = h.member("alice", 0).await;
        h.store.fail_next_commit();
        let err = h
            .exchange
            .create_item(
                &a,
                ItemDraft {
                    title: "Scarf".into(),
                    description: "Wool".into(),
                    category: "accessories".into(),
                    size: "one size".into(),
                    condition: Condition::Excellent,
                    tags: vec![],
                    points_required: 5,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(h.exchange.items_by_owner(a.user_id).await.unwrap().is_empty());
    }

    fn coat() -> ItemDraft {
        ItemDraft {
            title: "Wool coat".into(),
            description: "Long, charcoal".into(),
            category: "outerwear".into(),
            size: "L".into(),
            condition: Condition::Good,
            tags: vec![],
            points_required: 40,
        }
    }

    #[tokio::test]
    async fn test_concurrent_bootstrap_creates_one_admin() {
        let store = Arc::new(InMemoryStore::new());
        let exchange = ExchangeCoordinator::new(store.clone(), ExchangeConfig::default());
        store.set_commit_delay(Some(Duration::from_millis(50)));

        let (first, second) = tokio::join!(
            exchange.bootstrap_admin("first", "cred"),
            exchange.bootstrap_admin("second", "cred")
        );
        assert_eq!(usize::from(first.is_ok()) + usize::from(second.is_ok()), 1);
        let admins = store
            .users()
            .await
            .unwrap()
            .iter()
            .filter(|u| u.is_admin())
            .count();
        assert_eq!(admins, 1);
    }

    #[tokio::test]
    async fn test_ban_covers_writes_that_land_while_locking() {
        let h = harness().await;
        let target = h.member("mallory", 0).await;
        let other = h.member("olive", 0).await;
        let listed = h.listed(&target, 10).await;
        let wanted = h.listed(&other, 10).await;

        // Both writes hold the target's user lock through a slow commit; the
        // ban reads its scope before they land and must pick them up after.
        h.store.set_commit_delay(Some(Duration::from_millis(50)));
        let (created, requested, banned) = tokio::join!(
            h.exchange.create_item(&target, coat()),
            h.exchange.create_swap_request(&target, wanted, "trade?"),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                h.exchange.ban_user(&h.admin, target.user_id).await
            }
        );
        let created = created.unwrap();
        let requested = requested.unwrap();
        let report = banned.unwrap();
        h.store.set_commit_delay(None);

        assert_eq!(report.declined_swaps, vec![requested.id]);
        assert_eq!(report.rejected_items.len(), 2);
        assert!(report.rejected_items.contains(&listed));
        assert!(report.rejected_items.contains(&created.id));

        let owned = h.exchange.items_by_owner(target.user_id).await.unwrap();
        assert_eq!(owned.len(), 2);
        assert!(owned.iter().all(|i| i.state == ItemState::Rejected));
        let sent = h.exchange.requests_sent(target.user_id).await.unwrap();
        assert!(sent.iter().all(|s| !s.state.is_open()));
        assert_eq!(h.exchange.item(wanted).await.unwrap().state, ItemState::Available);
    }

    #[tokio::test]
    async fn test_correction_moves_points_between_members() {
        let h = harness().await;
        let a = h.member("alice", 80).await;
        let b = h.member("bob", 0).await;

        let entry = h
            .exchange
            .correct_points(&h.admin, a.user_id, b.user_id, 30)
            .await
            .unwrap();
        assert_eq!(entry.reason, TransferReason::Adjustment);
        assert_eq!(entry.from, Some(a.user_id));
        assert_eq!(h.exchange.balance_of(a.user_id).await.unwrap(), 50);
        assert_eq!(h.exchange.balance_of(b.user_id).await.unwrap(), 30);

        assert!(matches!(
            h.exchange.correct_points(&a, b.user_id, a.user_id, 10).await,
            Err(ExchangeError::Forbidden { .. })
        ));
        assert!(matches!(
            h.exchange
                .correct_points(&h.admin, b.user_id, a.user_id, 31)
                .await,
            Err(ExchangeError::InsufficientFunds { .. })
        ));

        let audit = h.exchange.audit().await.unwrap();
        assert!(audit.is_clean());
        assert_eq!(audit.issued, 80);
    }
}
