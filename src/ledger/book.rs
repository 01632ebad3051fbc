//! Ledger operations inside a transaction
//!
//! The ledger only ever appends. Balances are derived: the store keeps a
//! running total per user, updated in the same commit as each entry.

use tracing::debug;

use super::entry::{LedgerEntry, TransferReason};
use crate::core_types::{EntryId, Points, Reference, UserId};
use crate::error::ExchangeError;
use crate::store::Transaction;

pub struct Ledger<'t, 's> {
    tx: &'t mut Transaction<'s>,
}

impl<'t, 's> Ledger<'t, 's> {
    pub fn new(tx: &'t mut Transaction<'s>) -> Self {
        Self { tx }
    }

    /// Balance as seen by this transaction
    pub async fn balance_of(&self, user: UserId) -> Result<Points, ExchangeError> {
        self.tx.balance_of(user).await
    }

    /// Move `amount` points from one user to another
    ///
    /// # Errors
    /// - `InvalidAmount` if amount is zero
    /// - `Validation` if sender and recipient are the same user
    /// - `InsufficientFunds` if the sender's balance is below `amount`
    pub async fn record_transfer(
        &mut self,
        from: UserId,
        to: UserId,
        amount: Points,
        reason: TransferReason,
        reference: Reference,
    ) -> Result<LedgerEntry, ExchangeError> {
        if amount == 0 {
            return Err(ExchangeError::InvalidAmount);
        }
        if from == to {
            return Err(ExchangeError::validation(
                "to",
                "sender and recipient must differ",
            ));
        }

        let balance = self.tx.balance_of(from).await?;
        if balance < amount {
            return Err(ExchangeError::InsufficientFunds {
                user: from,
                balance,
                required: amount,
            });
        }

        let entry = LedgerEntry {
            id: EntryId::new(),
            from: Some(from),
            to,
            amount,
            reason,
            reference,
            created_at: self.tx.now(),
        };
        debug!(
            entry_id = %entry.id,
            from = %from,
            to = %to,
            amount,
            reason = %reason,
            "Transfer staged"
        );
        self.tx.append_entry(entry.clone());
        Ok(entry)
    }

    /// Credit points from outside the system (grant, signup bonus)
    pub fn issue(
        &mut self,
        to: UserId,
        amount: Points,
        reference: Reference,
    ) -> Result<LedgerEntry, ExchangeError> {
        if amount == 0 {
            return Err(ExchangeError::InvalidAmount);
        }
        let entry = LedgerEntry {
            id: EntryId::new(),
            from: None,
            to,
            amount,
            reason: TransferReason::Adjustment,
            reference,
            created_at: self.tx.now(),
        };
        debug!(entry_id = %entry.id, to = %to, amount, "Issuance staged");
        self.tx.append_entry(entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core_types::ItemId;
    use crate::store::{ExchangeStore, InMemoryStore};

    const TIMEOUT: Duration = Duration::from_secs(1);

    async fn seeded(store: &InMemoryStore, user: UserId, amount: Points) {
        let mut tx = Transaction::begin(store);
        Ledger::new(&mut tx)
            .issue(user, amount, Reference::User(user))
            .unwrap();
        tx.commit(TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn test_transfer_moves_points() {
        let store = InMemoryStore::new();
        let (a, b) = (UserId::new(), UserId::new());
        seeded(&store, b, 60).await;

        let mut tx = Transaction::begin(&store);
        let entry = Ledger::new(&mut tx)
            .record_transfer(b, a, 45, TransferReason::Redemption, Reference::Item(ItemId::new()))
            .await
            .unwrap();
        assert_eq!(entry.from, Some(b));
        tx.commit(TIMEOUT).await.unwrap();

        assert_eq!(store.balance_of(a).await.unwrap(), 45);
        assert_eq!(store.balance_of(b).await.unwrap(), 15);
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let store = InMemoryStore::new();
        let (a, b) = (UserId::new(), UserId::new());
        seeded(&store, a, 10).await;

        let mut tx = Transaction::begin(&store);
        let err = Ledger::new(&mut tx)
            .record_transfer(a, b, 11, TransferReason::Adjustment, Reference::User(b))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExchangeError::InsufficientFunds {
                user: a,
                balance: 10,
                required: 11
            }
        );
        assert!(tx.changes().entries.is_empty());
    }

    #[tokio::test]
    async fn test_staged_debits_count_against_balance() {
        let store = InMemoryStore::new();
        let (a, b) = (UserId::new(), UserId::new());
        seeded(&store, a, 50).await;

        let mut tx = Transaction::begin(&store);
        let mut ledger = Ledger::new(&mut tx);
        ledger
            .record_transfer(a, b, 30, TransferReason::Adjustment, Reference::User(b))
            .await
            .unwrap();
        let err = ledger
            .record_transfer(a, b, 30, TransferReason::Adjustment, Reference::User(b))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::InsufficientFunds { balance: 20, .. }
        ));
    }

    #[tokio::test]
    async fn test_invalid_transfers() {
        let store = InMemoryStore::new();
        let a = UserId::new();
        let mut tx = Transaction::begin(&store);
        let mut ledger = Ledger::new(&mut tx);

        assert_eq!(
            ledger
                .record_transfer(a, UserId::new(), 0, TransferReason::Adjustment, Reference::User(a))
                .await,
            Err(ExchangeError::InvalidAmount)
        );
        assert!(matches!(
            ledger
                .record_transfer(a, a, 5, TransferReason::Adjustment, Reference::User(a))
                .await,
            Err(ExchangeError::Validation { field: "to", .. })
        ));
        assert_eq!(
            ledger.issue(a, 0, Reference::User(a)),
            Err(ExchangeError::InvalidAmount)
        );
    }

    #[tokio::test]
    async fn test_transfers_conserve_total() {
        let store = InMemoryStore::new();
        let users: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();
        for u in &users {
            seeded(&store, *u, 100).await;
        }

        let moves = [(0, 1, 30), (1, 2, 75), (2, 3, 5), (3, 0, 105), (0, 2, 1)];
        for (from, to, amount) in moves {
            let mut tx = Transaction::begin(&store);
            Ledger::new(&mut tx)
                .record_transfer(
                    users[from],
                    users[to],
                    amount,
                    TransferReason::Adjustment,
                    Reference::User(users[to]),
                )
                .await
                .unwrap();
            tx.commit(TIMEOUT).await.unwrap();
        }

        let mut total = 0;
        for u in &users {
            total += store.balance_of(*u).await.unwrap();
        }
        assert_eq!(total, 400);
    }
}
