//! Item Registry - lifecycle transitions inside a transaction
//!
//! Every transition is checked twice: against the states the operation
//! accepts, and against the transition table in [`ItemState`].

use tracing::debug;

use super::state::ItemState;
use super::types::{Item, ItemDraft, ItemPatch};
use crate::core_types::{ItemId, UserId};
use crate::error::ExchangeError;
use crate::store::{SwapQuery, Transaction};
use crate::swap::SwapWorkflow;

pub struct ItemRegistry<'t, 's> {
    tx: &'t mut Transaction<'s>,
}

impl<'t, 's> ItemRegistry<'t, 's> {
    pub fn new(tx: &'t mut Transaction<'s>) -> Self {
        Self { tx }
    }

    /// New listing, waiting for moderation
    pub fn create(&mut self, owner: UserId, draft: ItemDraft) -> Result<Item, ExchangeError> {
        let draft = draft.validated()?;
        let now = self.tx.now();
        let item = Item {
            id: ItemId::new(),
            owner,
            title: draft.title,
            description: draft.description,
            category: draft.category,
            size: draft.size,
            condition: draft.condition,
            tags: draft.tags,
            points_required: draft.points_required,
            state: ItemState::PendingApproval,
            featured: false,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.tx.stage_item(item.clone());
        Ok(item)
    }

    pub async fn approve(&mut self, id: ItemId) -> Result<Item, ExchangeError> {
        self.transition(id, &[ItemState::PendingApproval], ItemState::Available)
            .await
    }

    pub async fn reject(&mut self, id: ItemId) -> Result<Item, ExchangeError> {
        self.transition(id, &[ItemState::PendingApproval], ItemState::Rejected)
            .await
    }

    /// Moderation cascade: decline any open request, then reject
    ///
    /// Accepts any non-terminal state. Already-terminal items are returned unchanged.
    pub async fn force_reject(&mut self, id: ItemId) -> Result<Item, ExchangeError> {
        let item = self.tx.item(id).await?;
        if item.state.is_terminal() {
            return Ok(item);
        }
        self.decline_open_requests(id).await?;
        self.transition(
            id,
            &[ItemState::PendingApproval, ItemState::Available],
            ItemState::Rejected,
        )
        .await
    }

    /// Owner deletes the listing; open requests are declined first
    pub async fn withdraw(&mut self, id: ItemId) -> Result<Item, ExchangeError> {
        self.decline_open_requests(id).await?;
        self.transition(
            id,
            &[ItemState::PendingApproval, ItemState::Available],
            ItemState::Withdrawn,
        )
        .await
    }

    pub async fn update(&mut self, id: ItemId, patch: ItemPatch) -> Result<Item, ExchangeError> {
        let mut item = self.tx.item(id).await?;
        if !item.state.is_editable() {
            return Err(ExchangeError::invalid_state(
                format!("item {}", id),
                item.state,
                "PENDING_APPROVAL|AVAILABLE",
            ));
        }
        patch.apply_to(&mut item)?;
        item.updated_at = self.tx.now();
        self.tx.stage_item(item.clone());
        Ok(item)
    }

    pub async fn set_featured(&mut self, id: ItemId, featured: bool) -> Result<Item, ExchangeError> {
        let mut item = self.tx.item(id).await?;
        if item.state.is_terminal() {
            return Err(ExchangeError::invalid_state(
                format!("item {}", id),
                item.state,
                "a non-terminal state",
            ));
        }
        item.featured = featured;
        item.updated_at = self.tx.now();
        self.tx.stage_item(item.clone());
        Ok(item)
    }

    pub(crate) async fn mark_pending_swap(&mut self, id: ItemId) -> Result<Item, ExchangeError> {
        self.transition(id, &[ItemState::Available], ItemState::PendingSwap)
            .await
    }

    pub(crate) async fn mark_swapped(&mut self, id: ItemId) -> Result<Item, ExchangeError> {
        self.transition(
            id,
            &[ItemState::Available, ItemState::PendingSwap],
            ItemState::Swapped,
        )
        .await
    }

    pub(crate) async fn mark_available(&mut self, id: ItemId) -> Result<Item, ExchangeError> {
        self.transition(id, &[ItemState::PendingSwap], ItemState::Available)
            .await
    }

    async fn decline_open_requests(&mut self, id: ItemId) -> Result<(), ExchangeError> {
        let open = self.tx.swaps(SwapQuery::open_for_item(id)).await?;
        for swap in open {
            debug!(item_id = %id, swap_id = %swap.id, "Cascading decline");
            SwapWorkflow::new(&mut *self.tx).force_decline(swap.id).await?;
        }
        Ok(())
    }

    async fn transition(
        &mut self,
        id: ItemId,
        from: &[ItemState],
        next: ItemState,
    ) -> Result<Item, ExchangeError> {
        let mut item = self.tx.item(id).await?;
        if !from.contains(&item.state) || !item.state.can_transition_to(next) {
            let expected = from
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join("|");
            return Err(ExchangeError::invalid_state(
                format!("item {}", id),
                item.state,
                expected,
            ));
        }
        debug!(item_id = %id, from = %item.state, to = %next, "Item transition");
        item.state = next;
        item.updated_at = self.tx.now();
        self.tx.stage_item(item.clone());
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::items::Condition;
    use crate::store::InMemoryStore;

    fn draft() -> ItemDraft {
        ItemDraft {
            title: "Wool coat".into(),
            description: "Warm".into(),
            category: "outerwear".into(),
            size: "L".into(),
            condition: Condition::Excellent,
            tags: vec![],
            points_required: 45,
        }
    }

    async fn listed(store: &InMemoryStore) -> ItemId {
        let mut tx = Transaction::begin(store);
        let item = ItemRegistry::new(&mut tx).create(UserId::new(), draft()).unwrap();
        tx.commit(Duration::from_secs(1)).await.unwrap();
        item.id
    }

    #[tokio::test]
    async fn test_create_starts_pending_approval() {
        let store = InMemoryStore::new();
        let mut tx = Transaction::begin(&store);
        let item = ItemRegistry::new(&mut tx).create(UserId::new(), draft()).unwrap();
        assert_eq!(item.state, ItemState::PendingApproval);
        assert!(!item.featured);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_points() {
        let store = InMemoryStore::new();
        let mut tx = Transaction::begin(&store);
        let mut bad = draft();
        bad.points_required = 250;
        assert!(matches!(
            ItemRegistry::new(&mut tx).create(UserId::new(), bad),
            Err(ExchangeError::Validation { .. })
        ));
        assert!(tx.changes().is_empty());
    }

    #[tokio::test]
    async fn test_approve_only_from_pending_approval() {
        let store = InMemoryStore::new();
        let id = listed(&store).await;

        let mut tx = Transaction::begin(&store);
        let mut registry = ItemRegistry::new(&mut tx);
        assert_eq!(registry.approve(id).await.unwrap().state, ItemState::Available);

        let err = registry.approve(id).await.unwrap_err();
        assert_eq!(
            err,
            ExchangeError::InvalidState {
                entity: format!("item {}", id),
                current: "AVAILABLE".into(),
                expected: "PENDING_APPROVAL".into(),
            }
        );
        assert!(registry.reject(id).await.is_err());
    }

    #[tokio::test]
    async fn test_internal_transitions() {
        let store = InMemoryStore::new();
        let id = listed(&store).await;

        let mut tx = Transaction::begin(&store);
        let mut registry = ItemRegistry::new(&mut tx);

        // Not approved yet
        assert!(registry.mark_pending_swap(id).await.is_err());
        assert!(registry.mark_swapped(id).await.is_err());
        assert!(registry.mark_available(id).await.is_err());

        registry.approve(id).await.unwrap();
        assert!(registry.mark_available(id).await.is_err());
        registry.mark_pending_swap(id).await.unwrap();
        registry.mark_available(id).await.unwrap();
        registry.mark_pending_swap(id).await.unwrap();
        let item = registry.mark_swapped(id).await.unwrap();
        assert_eq!(item.state, ItemState::Swapped);

        assert!(registry.mark_available(id).await.is_err());
        assert!(registry.mark_swapped(id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_and_feature() {
        let store = InMemoryStore::new();
        let id = listed(&store).await;

        let mut tx = Transaction::begin(&store);
        let mut registry = ItemRegistry::new(&mut tx);
        let patch = ItemPatch {
            title: Some("Long wool coat".into()),
            points_required: Some(60),
            ..Default::default()
        };
        let item = registry.update(id, patch).await.unwrap();
        assert_eq!(item.title, "Long wool coat");
        assert_eq!(item.points_required, 60);

        let item = registry.set_featured(id, true).await.unwrap();
        assert!(item.featured);

        registry.reject(id).await.unwrap();
        assert!(registry.update(id, ItemPatch::default()).await.is_err());
        assert!(registry.set_featured(id, false).await.is_err());
    }

    #[tokio::test]
    async fn test_withdraw_and_force_reject() {
        let store = InMemoryStore::new();
        let a = listed(&store).await;
        let b = listed(&store).await;

        let mut tx = Transaction::begin(&store);
        let mut registry = ItemRegistry::new(&mut tx);
        assert_eq!(registry.withdraw(a).await.unwrap().state, ItemState::Withdrawn);
        assert!(registry.withdraw(a).await.is_err());

        registry.approve(b).await.unwrap();
        assert_eq!(registry.force_reject(b).await.unwrap().state, ItemState::Rejected);
        // Idempotent on terminal items
        assert_eq!(registry.force_reject(b).await.unwrap().state, ItemState::Rejected);
    }
}
