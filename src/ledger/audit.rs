//! Ledger audit
//!
//! Replays the full entry log and compares the result with the cached
//! running totals. A healthy store reports no drift.

use rustc_hash::FxHashMap;
use serde::Serialize;

use super::entry::LedgerEntry;
use crate::core_types::{Points, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceDrift {
    pub user: UserId,
    pub replayed: i128,
    pub cached: Points,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub entries: usize,
    /// Points that entered the system through issuance
    pub issued: Points,
    /// Sum of every replayed balance; equals `issued` when value is conserved
    pub circulating: i128,
    pub drift: Vec<BalanceDrift>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.drift.is_empty() && self.circulating == self.issued as i128
    }
}

/// Derive every balance from scratch
pub fn replay_balances(entries: &[LedgerEntry]) -> FxHashMap<UserId, i128> {
    let mut balances: FxHashMap<UserId, i128> = FxHashMap::default();
    for entry in entries {
        *balances.entry(entry.to).or_default() += entry.amount as i128;
        if let Some(from) = entry.from {
            *balances.entry(from).or_default() -= entry.amount as i128;
        }
    }
    balances
}

/// Compare replayed balances against `cached` (one lookup per user seen in the log)
pub fn audit(entries: &[LedgerEntry], cached: impl Fn(UserId) -> Points) -> AuditReport {
    let replayed = replay_balances(entries);
    let issued = entries
        .iter()
        .filter(|e| e.is_issuance())
        .map(|e| e.amount)
        .sum();

    let mut drift: Vec<BalanceDrift> = replayed
        .iter()
        .filter_map(|(user, replayed)| {
            let cached = cached(*user);
            (cached as i128 != *replayed).then_some(BalanceDrift {
                user: *user,
                replayed: *replayed,
                cached,
            })
        })
        .collect();
    drift.sort_by_key(|d| d.user);

    AuditReport {
        entries: entries.len(),
        issued,
        circulating: replayed.values().sum(),
        drift,
    }
}
