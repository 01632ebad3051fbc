//! Swap request states
//!
//! ```text
//! PENDING → ACCEPTED → COMPLETED
//!    ↓          ↓
//!  DECLINED ←───┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    /// Initial state - waiting for the owner's answer
    Pending,
    /// Owner agreed; waiting for settlement
    Accepted,
    /// Terminal: declined by the owner, cancelled by the requester, or cascaded
    Declined,
    /// Terminal: settled, item swapped
    Completed,
}

impl SwapState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapState::Declined | SwapState::Completed)
    }

    /// Open requests hold their item in PENDING_SWAP
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, SwapState::Pending | SwapState::Accepted)
    }

    pub fn can_transition_to(&self, next: SwapState) -> bool {
        matches!(
            (self, next),
            (SwapState::Pending, SwapState::Accepted)
                | (SwapState::Pending, SwapState::Declined)
                | (SwapState::Accepted, SwapState::Declined)
                | (SwapState::Accepted, SwapState::Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapState::Pending => "PENDING",
            SwapState::Accepted => "ACCEPTED",
            SwapState::Declined => "DECLINED",
            SwapState::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
