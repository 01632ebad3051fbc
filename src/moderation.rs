//! Moderation Gate
//!
//! Admin-only transitions. The caller's admin flag is re-read from the
//! transaction rather than trusted from the session, so a demoted or banned
//! admin loses power immediately.

use serde::Serialize;
use tracing::{debug, info};

use crate::core_types::{ItemId, SwapId, UserId};
use crate::error::ExchangeError;
use crate::identity::Actor;
use crate::items::{Item, ItemRegistry};
use crate::store::{ItemQuery, SwapQuery, Transaction};
use crate::swap::SwapWorkflow;
use crate::user_account::User;

/// What a ban touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BanReport {
    pub user: UserId,
    pub declined_swaps: Vec<SwapId>,
    pub rejected_items: Vec<ItemId>,
}

pub struct ModerationGate<'t, 's> {
    tx: &'t mut Transaction<'s>,
}

impl<'t, 's> ModerationGate<'t, 's> {
    pub fn new(tx: &'t mut Transaction<'s>) -> Self {
        Self { tx }
    }

    /// Load the acting admin; `Forbidden` for non-admins and banned admins
    pub async fn require_admin(&self, actor: &Actor) -> Result<User, ExchangeError> {
        let admin = self.tx.user(actor.user_id).await?;
        if admin.is_banned() {
            return Err(ExchangeError::forbidden("user is banned"));
        }
        if !admin.is_admin() {
            return Err(ExchangeError::forbidden("admin privileges required"));
        }
        Ok(admin)
    }

    pub async fn approve_item(&mut self, actor: &Actor, item: ItemId) -> Result<Item, ExchangeError> {
        self.require_admin(actor).await?;
        ItemRegistry::new(&mut *self.tx).approve(item).await
    }

    pub async fn reject_item(&mut self, actor: &Actor, item: ItemId) -> Result<Item, ExchangeError> {
        self.require_admin(actor).await?;
        ItemRegistry::new(&mut *self.tx).reject(item).await
    }

    pub async fn set_featured(
        &mut self,
        actor: &Actor,
        item: ItemId,
        featured: bool,
    ) -> Result<Item, ExchangeError> {
        self.require_admin(actor).await?;
        ItemRegistry::new(&mut *self.tx)
            .set_featured(item, featured)
            .await
    }

    /// Ban a user and unwind everything they had in flight
    ///
    /// Open requests where the user is either side are declined first, so
    /// other owners' items go back to AVAILABLE. Then every non-terminal item
    /// the user owns is rejected.
    pub async fn ban_user(&mut self, actor: &Actor, target: UserId) -> Result<BanReport, ExchangeError> {
        self.require_admin(actor).await?;
        if target == actor.user_id {
            return Err(ExchangeError::validation("user", "admins cannot ban themselves"));
        }

        let mut user = self.tx.user(target).await?;
        user.set_banned(true);
        self.tx.stage_user(user);

        let open = self
            .tx
            .swaps(SwapQuery {
                participant: Some(target),
                open_only: true,
                ..Default::default()
            })
            .await?;
        let mut declined_swaps = Vec::with_capacity(open.len());
        for swap in open {
            SwapWorkflow::new(&mut *self.tx).force_decline(swap.id).await?;
            declined_swaps.push(swap.id);
        }

        let owned = self.tx.items(ItemQuery::by_owner(target)).await?;
        let mut rejected_items = Vec::new();
        for item in owned.into_iter().filter(|i| !i.state.is_terminal()) {
            ItemRegistry::new(&mut *self.tx).force_reject(item.id).await?;
            rejected_items.push(item.id);
        }

        debug!(
            user_id = %target,
            swaps = declined_swaps.len(),
            items = rejected_items.len(),
            "Ban cascade staged"
        );
        Ok(BanReport {
            user: target,
            declined_swaps,
            rejected_items,
        })
    }

    pub async fn unban_user(&mut self, actor: &Actor, target: UserId) -> Result<User, ExchangeError> {
        self.require_admin(actor).await?;
        let mut user = self.tx.user(target).await?;
        user.set_banned(false);
        self.tx.stage_user(user.clone());
        Ok(user)
    }

    pub async fn set_admin(
        &mut self,
        actor: &Actor,
        target: UserId,
        is_admin: bool,
    ) -> Result<User, ExchangeError> {
        self.require_admin(actor).await?;
        if target == actor.user_id && !is_admin {
            return Err(ExchangeError::validation("user", "admins cannot demote themselves"));
        }
        let mut user = self.tx.user(target).await?;
        user.set_admin(is_admin);
        self.tx.stage_user(user.clone());
        info!(user_id = %target, is_admin, "Admin flag staged");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::items::{Condition, ItemDraft, ItemState};
    use crate::store::{ExchangeStore, InMemoryStore};
    use crate::swap::SwapState;

    const TIMEOUT: Duration = Duration::from_secs(1);

    async fn seed_user(store: &InMemoryStore, name: &str, admin: bool) -> Actor {
        let mut user = User::register(name, "cred", Utc::now()).unwrap();
        user.set_admin(admin);
        let actor = Actor::from(&user);
        let mut tx = Transaction::begin(store);
        tx.stage_user(user);
        tx.commit(TIMEOUT).await.unwrap();
        actor
    }

    fn draft(title: &str) -> ItemDraft {
        ItemDraft {
            title: title.into(),
            description: "desc".into(),
            category: "tops".into(),
            size: "M".into(),
            condition: Condition::Good,
            tags: vec![],
            points_required: 10,
        }
    }

    async fn approved_item(store: &InMemoryStore, admin: &Actor, owner: UserId) -> ItemId {
        let mut tx = Transaction::begin(store);
        let item = ItemRegistry::new(&mut tx).create(owner, draft("tee")).unwrap();
        ModerationGate::new(&mut tx)
            .approve_item(admin, item.id)
            .await
            .unwrap();
        tx.commit(TIMEOUT).await.unwrap();
        item.id
    }

    async fn item_state(store: &InMemoryStore, id: ItemId) -> ItemState {
        store.item(id).await.unwrap().unwrap().state
    }

    #[tokio::test]
    async fn test_non_admin_forbidden() {
        let store = InMemoryStore::new();
        let user = seed_user(&store, "plain", false).await;
        let mut tx = Transaction::begin(&store);
        let item = ItemRegistry::new(&mut tx)
            .create(user.user_id, draft("hat"))
            .unwrap();

        let mut gate = ModerationGate::new(&mut tx);
        assert!(matches!(
            gate.approve_item(&user, item.id).await,
            Err(ExchangeError::Forbidden { .. })
        ));
        // A forged admin flag on the actor does not help
        let forged = Actor::admin(user.user_id);
        assert!(matches!(
            gate.approve_item(&forged, item.id).await,
            Err(ExchangeError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_admin_cannot_ban_self() {
        let store = InMemoryStore::new();
        let admin = seed_user(&store, "root", true).await;
        let mut tx = Transaction::begin(&store);
        assert!(matches!(
            ModerationGate::new(&mut tx).ban_user(&admin, admin.user_id).await,
            Err(ExchangeError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_ban_cascades() {
        let store = InMemoryStore::new();
        let admin = seed_user(&store, "root", true).await;
        let banned = seed_user(&store, "mallory", false).await;
        let other = seed_user(&store, "olivia", false).await;

        // mallory requests olivia's item; someone requests mallory's item
        let theirs = approved_item(&store, &admin, other.user_id).await;
        let mine = approved_item(&store, &admin, banned.user_id).await;
        let mut tx = Transaction::begin(&store);
        let s1 = SwapWorkflow::new(&mut tx)
            .create_request(theirs, banned.user_id, "")
            .await
            .unwrap();
        let s2 = SwapWorkflow::new(&mut tx)
            .create_request(mine, other.user_id, "")
            .await
            .unwrap();
        let pending = ItemRegistry::new(&mut tx)
            .create(banned.user_id, draft("unreviewed"))
            .unwrap();
        tx.commit(TIMEOUT).await.unwrap();

        let mut tx = Transaction::begin(&store);
        let report = ModerationGate::new(&mut tx)
            .ban_user(&admin, banned.user_id)
            .await
            .unwrap();
        tx.commit(TIMEOUT).await.unwrap();

        assert_eq!(report.declined_swaps.len(), 2);
        assert_eq!(report.rejected_items.len(), 2);
        assert!(store.user(banned.user_id).await.unwrap().unwrap().is_banned());
        for id in [s1.id, s2.id] {
            assert_eq!(
                store.swap(id).await.unwrap().unwrap().state,
                SwapState::Declined
            );
        }
        assert_eq!(item_state(&store, theirs).await, ItemState::Available);
        assert_eq!(item_state(&store, mine).await, ItemState::Rejected);
        assert_eq!(item_state(&store, pending.id).await, ItemState::Rejected);
    }

    #[tokio::test]
    async fn test_unban_and_set_admin() {
        let store = InMemoryStore::new();
        let admin = seed_user(&store, "root", true).await;
        let user = seed_user(&store, "bob", false).await;

        let mut tx = Transaction::begin(&store);
        let mut gate = ModerationGate::new(&mut tx);
        gate.ban_user(&admin, user.user_id).await.unwrap();
        assert!(!gate.unban_user(&admin, user.user_id).await.unwrap().is_banned());
        assert!(gate.set_admin(&admin, user.user_id, true).await.unwrap().is_admin());
        assert!(matches!(
            gate.set_admin(&admin, admin.user_id, false).await,
            Err(ExchangeError::Validation { .. })
        ));
    }
}
