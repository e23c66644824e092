//! Ledger error types for validation, lookup and concurrency failures.

use cashbook_shared::AppError;
use cashbook_shared::types::{EntryId, ExpenditureId, ProjectId};
use rust_decimal::Decimal;
use thiserror::Error;

use super::entry::{Owner, Scope};

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// Amount, price or quantity is not usable.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Owner references a non-positive scope id.
    #[error("Invalid owner: {0:?}")]
    InvalidOwner(Owner),

    /// A touched scope cannot cover an outbound movement.
    #[error("Insufficient balance on {scope}: available {available}, requested {requested}")]
    InsufficientFunds {
        /// The scope that would go negative.
        scope: Scope,
        /// Its current balance.
        available: Decimal,
        /// The movement total.
        requested: Decimal,
    },

    // ========== Lookup Errors ==========
    /// Ledger entry not found.
    #[error("Ledger entry not found: {0}")]
    EntryNotFound(EntryId),

    /// Project not found.
    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    /// Project expenditure not found.
    #[error("Project expenditure not found: {0}")]
    ExpenditureNotFound(ExpenditureId),

    // ========== Cancellation Errors ==========
    /// Entry has already been cancelled.
    #[error("Ledger entry {0} is already cancelled")]
    AlreadyCancelled(EntryId),

    /// Entry cannot be reversed (inbound or already cancelled).
    #[error("Ledger entry {0} cannot be reversed")]
    NotReversible(EntryId),

    // ========== Concurrency Errors ==========
    /// Concurrent writer detected, or the scope lock could not be acquired in time.
    #[error("Concurrent modification detected, please retry")]
    ConcurrencyConflict,

    /// A pre-built entry was computed from a balance that is no longer the latest.
    #[error("Stale balance for {scope}: entry expects {expected}, latest is {actual}")]
    StaleBalance {
        /// The scope whose head moved.
        scope: Scope,
        /// Prior balance recorded in the entry.
        expected: Decimal,
        /// Current latest balance.
        actual: Decimal,
    },

    // ========== Storage Errors ==========
    /// The underlying store failed.
    #[error("Storage failure: {0}")]
    Storage(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::InvalidOwner(_) => "INVALID_OWNER",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            Self::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            Self::ExpenditureNotFound(_) => "EXPENDITURE_NOT_FOUND",
            Self::AlreadyCancelled(_) => "ALREADY_CANCELLED",
            Self::NotReversible(_) => "NOT_REVERSIBLE",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::StaleBalance { .. } => "STALE_BALANCE",
            Self::Storage(_) => "STORAGE_FAILURE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - validation errors
            Self::InvalidAmount(_) | Self::InvalidOwner(_) => 400,

            // 404 Not Found
            Self::EntryNotFound(_) | Self::ProjectNotFound(_) | Self::ExpenditureNotFound(_) => {
                404
            }

            // 409 Conflict - state and concurrency errors
            Self::AlreadyCancelled(_) | Self::ConcurrencyConflict | Self::StaleBalance { .. } => {
                409
            }

            // 422 Unprocessable - business rule rejections
            Self::InsufficientFunds { .. } | Self::NotReversible(_) => 422,

            // 500 Internal Server Error
            Self::Storage(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict | Self::StaleBalance { .. })
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::InvalidAmount(_) | LedgerError::InvalidOwner(_) => {
                Self::Validation(message)
            }
            LedgerError::InsufficientFunds { .. } => {
                Self::BusinessRule("insufficient balance".to_string())
            }
            LedgerError::NotReversible(_) => Self::BusinessRule(message),
            LedgerError::EntryNotFound(_)
            | LedgerError::ProjectNotFound(_)
            | LedgerError::ExpenditureNotFound(_) => Self::NotFound(message),
            LedgerError::AlreadyCancelled(_)
            | LedgerError::ConcurrencyConflict
            | LedgerError::StaleBalance { .. } => Self::Conflict(message),
            LedgerError::Storage(msg) => Self::Database(msg),
            LedgerError::Internal(msg) => Self::Internal(msg),
        }
    }
}
