use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SwapState;
use crate::core_types::{ItemId, SwapId, UserId};

/// A negotiated swap between a requester and an item's owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub id: SwapId,
    pub item: ItemId,
    pub requester: UserId,
    /// Copied from the item when the request is created
    pub owner: UserId,
    pub state: SwapState,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl SwapRequest {
    pub fn involves(&self, user: UserId) -> bool {
        self.requester == user || self.owner == user
    }
}
