//! Ledger entries
//!
//! Each point movement is recorded as one immutable entry.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{EntryId, Points, Reference, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferReason {
    Redemption,
    SwapCompletion,
    Adjustment,
}

impl TransferReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferReason::Redemption => "redemption",
            TransferReason::SwapCompletion => "swap_completion",
            TransferReason::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for TransferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable record of one point transfer
///
/// `from == None` marks an issuance: points entering the system
/// (admin grant, signup bonus). Issuance always has reason `Adjustment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub from: Option<UserId>,
    pub to: UserId,
    pub amount: Points,
    pub reason: TransferReason,
    pub reference: Reference,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    #[inline]
    pub fn is_issuance(&self) -> bool {
        self.from.is_none()
    }

    /// Signed effect of this entry on `user`'s balance
    pub fn delta_for(&self, user: UserId) -> i128 {
        let mut delta = 0i128;
        if self.to == user {
            delta += self.amount as i128;
        }
        if self.from == Some(user) {
            delta -= self.amount as i128;
        }
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::ItemId;

    fn entry(from: Option<UserId>, to: UserId, amount: Points) -> LedgerEntry {
        LedgerEntry {
            id: EntryId::new(),
            from,
            to,
            amount,
            reason: TransferReason::Redemption,
            reference: Reference::Item(ItemId::new()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_delta_for() {
        let a = UserId::new();
        let b = UserId::new();
        let c = UserId::new();
        let e = entry(Some(a), b, 45);

        assert_eq!(e.delta_for(a), -45);
        assert_eq!(e.delta_for(b), 45);
        assert_eq!(e.delta_for(c), 0);
        assert!(!e.is_issuance());
    }

    #[test]
    fn test_issuance() {
        let a = UserId::new();
        let e = entry(None, a, 60);
        assert!(e.is_issuance());
        assert_eq!(e.delta_for(a), 60);
    }
}
