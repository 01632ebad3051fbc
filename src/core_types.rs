//! Core types used throughout the system
//!
//! Identifiers are ULID newtypes: sortable by creation time, generated
//! without coordination, and distinct at the type level so an `ItemId`
//! can never be passed where a `UserId` is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Point amounts. Balances and prices are whole points.
pub type Points = u64;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Generate a new unique identifier
            pub fn new() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Get the inner ULID value
            pub fn inner(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }
    };
}

ulid_id!(
    /// User ID - immutable after registration
    UserId
);

ulid_id!(
    /// Item ID - one per listing
    ItemId
);

ulid_id!(
    /// Swap request ID
    SwapId
);

ulid_id!(
    /// Ledger entry ID
    EntryId
);

/// What a ledger entry points back to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Reference {
    Item(ItemId),
    Swap(SwapId),
    User(UserId),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Item(id) => write!(f, "item:{}", id),
            Reference::Swap(id) => write!(f, "swap:{}", id),
            Reference::User(id) => write!(f, "user:{}", id),
        }
    }
}
