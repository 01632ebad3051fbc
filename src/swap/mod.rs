//! Swap Workflow
//!
//! Negotiated item exchange between a requester and an item owner.

pub mod state;
pub mod types;
pub mod workflow;

pub use state::SwapState;
pub use types::SwapRequest;
pub use workflow::{DEFAULT_MAX_MESSAGE_LEN, SwapWorkflow};
