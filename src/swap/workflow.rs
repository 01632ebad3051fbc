//! Swap Workflow
//!
//! Drives one request through its state machine and keeps the item in step:
//!
//! | request transition      | item effect                  |
//! |-------------------------|------------------------------|
//! | create → PENDING        | AVAILABLE → PENDING_SWAP     |
//! | PENDING → ACCEPTED      | (none)                       |
//! | → DECLINED              | PENDING_SWAP → AVAILABLE     |
//! | ACCEPTED → COMPLETED    | PENDING_SWAP → SWAPPED       |
//!
//! Only one open request per item can exist: creation requires AVAILABLE,
//! and creation itself moves the item out of AVAILABLE.

use tracing::debug;

use super::state::SwapState;
use super::types::SwapRequest;
use crate::core_types::{ItemId, SwapId, UserId};
use crate::error::ExchangeError;
use crate::items::{ItemRegistry, ItemState};
use crate::store::{SwapQuery, Transaction};

pub const DEFAULT_MAX_MESSAGE_LEN: usize = 500;

pub struct SwapWorkflow<'t, 's> {
    tx: &'t mut Transaction<'s>,
    max_message_len: usize,
}

impl<'t, 's> SwapWorkflow<'t, 's> {
    pub fn new(tx: &'t mut Transaction<'s>) -> Self {
        Self::with_message_limit(tx, DEFAULT_MAX_MESSAGE_LEN)
    }

    pub fn with_message_limit(tx: &'t mut Transaction<'s>, max_message_len: usize) -> Self {
        Self {
            tx,
            max_message_len,
        }
    }

    /// Open a request on an available item
    ///
    /// # Errors
    /// - `SelfSwapNotAllowed` if the requester owns the item
    /// - `ItemNotAvailable` if the item is not AVAILABLE (including when another
    ///   request already holds it)
    /// - `Validation` if the message is too long
    pub async fn create_request(
        &mut self,
        item_id: ItemId,
        requester: UserId,
        message: &str,
    ) -> Result<SwapRequest, ExchangeError> {
        let item = self.tx.item(item_id).await?;
        if item.owner == requester {
            return Err(ExchangeError::SelfSwapNotAllowed { item: item_id });
        }
        if item.state != ItemState::Available {
            return Err(ExchangeError::ItemNotAvailable {
                item: item_id,
                state: item.state.to_string(),
            });
        }

        let message = message.trim();
        if message.chars().count() > self.max_message_len {
            return Err(ExchangeError::validation(
                "message",
                format!("must be at most {} characters", self.max_message_len),
            ));
        }

        let open = self.tx.swaps(SwapQuery::open_for_item(item_id)).await?;
        if let Some(existing) = open.first() {
            // AVAILABLE with an open request means the invariant broke elsewhere
            return Err(ExchangeError::ItemNotAvailable {
                item: item_id,
                state: format!("held by swap {}", existing.id),
            });
        }

        let swap = SwapRequest {
            id: SwapId::new(),
            item: item_id,
            requester,
            owner: item.owner,
            state: SwapState::Pending,
            message: message.to_string(),
            created_at: self.tx.now(),
            completed_at: None,
            version: 0,
        };
        self.tx.stage_swap(swap.clone());
        ItemRegistry::new(&mut *self.tx).mark_pending_swap(item_id).await?;

        debug!(swap_id = %swap.id, item_id = %item_id, requester = %requester, "Swap requested");
        Ok(swap)
    }

    /// Owner answers a pending request
    pub async fn respond(
        &mut self,
        swap_id: SwapId,
        responder: UserId,
        accept: bool,
    ) -> Result<SwapRequest, ExchangeError> {
        let swap = self.tx.swap(swap_id).await?;
        if swap.owner != responder {
            return Err(ExchangeError::forbidden(
                "only the item owner may respond to a swap request",
            ));
        }
        Self::require(&swap, SwapState::Pending)?;

        if accept {
            self.set_state(swap, SwapState::Accepted)
        } else {
            self.decline(swap).await
        }
    }

    /// Requester withdraws a pending request
    pub async fn cancel(
        &mut self,
        swap_id: SwapId,
        requester: UserId,
    ) -> Result<SwapRequest, ExchangeError> {
        let swap = self.tx.swap(swap_id).await?;
        if swap.requester != requester {
            return Err(ExchangeError::forbidden(
                "only the requester may cancel a swap request",
            ));
        }
        Self::require(&swap, SwapState::Pending)?;
        self.decline(swap).await
    }

    /// Settle an accepted request; the item becomes SWAPPED
    pub async fn complete(&mut self, swap_id: SwapId) -> Result<SwapRequest, ExchangeError> {
        let swap = self.tx.swap(swap_id).await?;
        Self::require(&swap, SwapState::Accepted)?;

        let item_id = swap.item;
        let mut swap = self.set_state(swap, SwapState::Completed)?;
        swap.completed_at = Some(self.tx.now());
        self.tx.stage_swap(swap.clone());
        ItemRegistry::new(&mut *self.tx).mark_swapped(item_id).await?;
        Ok(swap)
    }

    /// Cascade path (moderation, item withdrawal): decline from PENDING or ACCEPTED
    pub async fn force_decline(&mut self, swap_id: SwapId) -> Result<SwapRequest, ExchangeError> {
        let swap = self.tx.swap(swap_id).await?;
        if !swap.state.is_open() {
            return Err(ExchangeError::invalid_state(
                format!("swap {}", swap_id),
                swap.state,
                "PENDING|ACCEPTED",
            ));
        }
        self.decline(swap).await
    }

    async fn decline(&mut self, swap: SwapRequest) -> Result<SwapRequest, ExchangeError> {
        let item_id = swap.item;
        let swap = self.set_state(swap, SwapState::Declined)?;
        ItemRegistry::new(&mut *self.tx).mark_available(item_id).await?;
        Ok(swap)
    }

    fn set_state(
        &mut self,
        mut swap: SwapRequest,
        next: SwapState,
    ) -> Result<SwapRequest, ExchangeError> {
        if !swap.state.can_transition_to(next) {
            return Err(ExchangeError::invalid_state(
                format!("swap {}", swap.id),
                swap.state,
                next.as_str(),
            ));
        }
        debug!(swap_id = %swap.id, from = %swap.state, to = %next, "Swap transition");
        swap.state = next;
        self.tx.stage_swap(swap.clone());
        Ok(swap)
    }

    fn require(swap: &SwapRequest, expected: SwapState) -> Result<(), ExchangeError> {
        if swap.state != expected {
            return Err(ExchangeError::invalid_state(
                format!("swap {}", swap.id),
                swap.state,
                expected.as_str(),
            ));
        }
        Ok(())
    }
}
