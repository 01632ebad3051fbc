use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::UserId;
use crate::error::ExchangeError;

const MAX_DISPLAY_NAME_LEN: usize = 64;

/// A marketplace member.
///
/// The point balance is NOT a field here: it is derived from the ledger.
///
/// # Invariants (enforced by private fields):
/// 1. id and credential reference are immutable after registration
/// 2. admin/banned flags only change through moderation (crate-internal setters)
/// 3. users are never deleted, only banned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    id: UserId,
    display_name: String,
    credential_ref: String,
    is_admin: bool,
    banned: bool,
    joined_at: DateTime<Utc>,
    pub(crate) version: u64,
}

impl User {
    /// Build a new, not-yet-persisted user.
    pub fn register(
        display_name: &str,
        credential_ref: &str,
        joined_at: DateTime<Utc>,
    ) -> Result<Self, ExchangeError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(ExchangeError::validation("display_name", "is required"));
        }
        if display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
            return Err(ExchangeError::validation(
                "display_name",
                format!("must be at most {} characters", MAX_DISPLAY_NAME_LEN),
            ));
        }
        if credential_ref.trim().is_empty() {
            return Err(ExchangeError::validation("credential_ref", "is required"));
        }

        Ok(Self {
            id: UserId::new(),
            display_name: display_name.to_string(),
            credential_ref: credential_ref.trim().to_string(),
            is_admin: false,
            banned: false,
            joined_at,
            version: 0,
        })
    }

    #[inline]
    pub fn id(&self) -> UserId {
        self.id
    }

    #[inline]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[inline]
    pub fn credential_ref(&self) -> &str {
        &self.credential_ref
    }

    #[inline]
    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    #[inline]
    pub fn is_banned(&self) -> bool {
        self.banned
    }

    #[inline]
    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_banned(&mut self, banned: bool) {
        self.banned = banned;
    }

    pub(crate) fn set_admin(&mut self, is_admin: bool) {
        self.is_admin = is_admin;
    }
}
