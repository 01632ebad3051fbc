//! Exchange Ledger - swap workflow engine for a community clothing marketplace
//!
//! Members list clothing, an admin approves listings, and items change hands
//! either by point redemption or by a negotiated swap request.
//!
//! # Modules
//!
//! - [`core_types`] - ULID identifiers, points, ledger references
//! - [`error`] - `ExchangeError` with stable codes
//! - [`user_account`] - Members and their moderation flags
//! - [`ledger`] - Append-only point transfers, derived balances, audit
//! - [`items`] - Item lifecycle and the transition table
//! - [`swap`] - Swap request state machine
//! - [`moderation`] - Admin-only transitions and the ban cascade
//! - [`store`] - Persistence seam, transactions, in-memory store
//! - [`locks`] - Keyed timeout-bounded locks
//! - [`identity`] - Session handles resolved to an `Actor`
//! - [`coordinator`] - Boundary operations as atomic units
//! - [`replay`] - JSON-lines command replay
//! - [`config`] / [`logging`] - YAML config and tracing setup

// Core types - must be first!
pub mod core_types;
pub mod error;

// Domain components
pub mod items;
pub mod ledger;
pub mod moderation;
pub mod swap;
pub mod user_account;

// Infrastructure
pub mod config;
pub mod identity;
pub mod locks;
pub mod logging;
pub mod store;

// Orchestration
pub mod coordinator;
pub mod replay;

// Convenient re-exports at crate root
pub use coordinator::{ExchangeCoordinator, PlatformStats, Redemption, Settlement, UserProfile};
pub use core_types::{EntryId, ItemId, Points, Reference, SwapId, UserId};
pub use error::ExchangeError;
pub use identity::{Actor, IdentityProvider, SessionRegistry, SessionToken};
pub use items::{Condition, Item, ItemDraft, ItemPatch, ItemState};
pub use ledger::{AuditReport, LedgerEntry, TransferReason};
pub use moderation::BanReport;
pub use store::{ExchangeStore, InMemoryStore};
pub use swap::{SwapRequest, SwapState};
pub use user_account::User;
