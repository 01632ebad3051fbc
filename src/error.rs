//! Exchange Error Types
//!
//! One taxonomy for every boundary operation. Each variant carries enough
//! context (entity id, current vs. expected state) to render a message.

use thiserror::Error;

use crate::core_types::{ItemId, Points, UserId};

/// Exchange error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    // === Caller Errors (not retried) ===
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("{entity} is {current}, expected {expected}")]
    InvalidState {
        entity: String,
        current: String,
        expected: String,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    // === Business Rule Errors ===
    #[error("Insufficient points for user {user}: balance {balance}, required {required}")]
    InsufficientFunds {
        user: UserId,
        balance: Points,
        required: Points,
    },

    #[error("Item {item} is not available (currently {state})")]
    ItemNotAvailable { item: ItemId, state: String },

    #[error("Cannot request a swap on your own item {item}")]
    SelfSwapNotAllowed { item: ItemId },

    #[error("Cannot redeem your own item {item}")]
    SelfRedemptionNotAllowed { item: ItemId },

    // === Authorization ===
    #[error("Session is missing or expired")]
    Unauthorized,

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    // === Transient (safe to retry) ===
    #[error("Conflict on {resource}, retry with fresh state")]
    Conflict { resource: String },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl ExchangeError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        ExchangeError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        ExchangeError::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(
        entity: impl Into<String>,
        current: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        ExchangeError::InvalidState {
            entity: entity.into(),
            current: current.to_string(),
            expected: expected.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        ExchangeError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            ExchangeError::Validation { .. } => "VALIDATION_ERROR",
            ExchangeError::InvalidAmount => "INVALID_AMOUNT",
            ExchangeError::InvalidState { .. } => "INVALID_STATE",
            ExchangeError::NotFound { .. } => "NOT_FOUND",
            ExchangeError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            ExchangeError::ItemNotAvailable { .. } => "ITEM_NOT_AVAILABLE",
            ExchangeError::SelfSwapNotAllowed { .. } => "SELF_SWAP_NOT_ALLOWED",
            ExchangeError::SelfRedemptionNotAllowed { .. } => "SELF_REDEMPTION_NOT_ALLOWED",
            ExchangeError::Unauthorized => "UNAUTHORIZED",
            ExchangeError::Forbidden { .. } => "FORBIDDEN",
            ExchangeError::Conflict { .. } => "CONFLICT",
            ExchangeError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            ExchangeError::Validation { .. } | ExchangeError::InvalidAmount => 400,
            ExchangeError::Unauthorized => 401,
            ExchangeError::Forbidden { .. } => 403,
            ExchangeError::NotFound { .. } => 404,
            ExchangeError::InvalidState { .. } | ExchangeError::Conflict { .. } => 409,
            ExchangeError::InsufficientFunds { .. }
            | ExchangeError::ItemNotAvailable { .. }
            | ExchangeError::SelfSwapNotAllowed { .. }
            | ExchangeError::SelfRedemptionNotAllowed { .. } => 422,
            ExchangeError::StorageUnavailable(_) => 503,
        }
    }

    /// Only lost races and transient storage failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Conflict { .. } | ExchangeError::StorageUnavailable(_)
        )
    }
}
