//! Item lifecycle states
//!
//! One authoritative transition table. Every state change an item goes
//! through is checked against [`ItemState::can_transition_to`].
//!
//! ```text
//! PENDING_APPROVAL → AVAILABLE ⇄ PENDING_SWAP → SWAPPED
//!        ↓               ↓  ↘         ↓
//!     REJECTED ←─────────┴───────────┘
//!     WITHDRAWN ← (owner delete, from PENDING_APPROVAL / AVAILABLE)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Initial state - waiting for moderation
    PendingApproval,
    /// Approved and exchangeable
    Available,
    /// An open swap request holds the item
    PendingSwap,
    /// Terminal: exchanged by redemption or completed swap
    Swapped,
    /// Terminal: rejected by moderation
    Rejected,
    /// Terminal: listing deleted by its owner
    Withdrawn,
}

impl ItemState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Swapped | ItemState::Rejected | ItemState::Withdrawn
        )
    }

    /// The transition table
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (PendingApproval, Available)
                | (PendingApproval, Rejected)
                | (PendingApproval, Withdrawn)
                | (Available, PendingSwap)
                | (Available, Swapped)
                | (Available, Rejected)
                | (Available, Withdrawn)
                | (PendingSwap, Available)
                | (PendingSwap, Swapped)
                | (PendingSwap, Rejected)
        )
    }

    /// Owners may edit descriptive fields only before the item is locked in an exchange
    pub fn is_editable(&self) -> bool {
        matches!(self, ItemState::PendingApproval | ItemState::Available)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::PendingApproval => "PENDING_APPROVAL",
            ItemState::Available => "AVAILABLE",
            ItemState::PendingSwap => "PENDING_SWAP",
            ItemState::Swapped => "SWAPPED",
            ItemState::Rejected => "REJECTED",
            ItemState::Withdrawn => "WITHDRAWN",
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
