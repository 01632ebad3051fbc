//! Item Registry
//!
//! Item metadata plus the lifecycle state machine. The state field is the
//! single source of truth for which operations are legal on an item.

pub mod registry;
pub mod state;
pub mod types;

pub use registry::ItemRegistry;
pub use state::ItemState;
pub use types::{Condition, Item, ItemDraft, ItemPatch, MAX_POINTS, MIN_POINTS};
