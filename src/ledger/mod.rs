//! Ledger - append-only record of point transfers
//!
//! Every balance change is one immutable [`LedgerEntry`]. A user's balance is
//! the sum received minus the sum sent; corrections are new `adjustment`
//! entries, never edits.

pub mod audit;
pub mod book;
pub mod entry;

pub use audit::{AuditReport, BalanceDrift, audit, replay_balances};
pub use book::Ledger;
pub use entry::{LedgerEntry, TransferReason};
