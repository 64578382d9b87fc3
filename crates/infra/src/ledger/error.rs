use thiserror::Error;

use stockledger_core::{DomainError, ProductId};

/// Ledger operation error.
///
/// Every variant means the operation had **no effect**: the enclosing
/// transaction was rolled back (or never started).
///
/// ## Error Categories
///
/// - **InvalidArgument**: malformed input, detected before storage is touched
/// - **NotFound**: the referenced product, movement or actor does not exist
/// - **InsufficientStock**: the change would drive quantity-on-hand negative
/// - **ConcurrencyConflict**: lock timeout, deadlock, serialization failure or a
///   dropped connection; the only category safe to retry automatically
/// - **StorageFailure**: anything else the store reports
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient stock for product {product_id}: on hand {on_hand}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        on_hand: i64,
        requested: i64,
    },

    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl LedgerError {
    /// Whether the whole operation may be retried from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict(_))
    }

    /// Stable machine-readable code for callers that translate errors.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidArgument(_) => "invalid_argument",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::InsufficientStock { .. } => "insufficient_stock",
            LedgerError::ConcurrencyConflict(_) => "concurrency_conflict",
            LedgerError::StorageFailure(_) => "storage_failure",
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => LedgerError::InvalidArgument(msg),
            DomainError::InvalidId(msg) => LedgerError::InvalidArgument(msg),
            DomainError::NotFound(what) => LedgerError::NotFound(what),
            DomainError::InsufficientStock {
                product_id,
                on_hand,
                requested,
            } => LedgerError::InsufficientStock {
                product_id,
                on_hand,
                requested,
            },
            DomainError::Conflict(msg) => LedgerError::ConcurrencyConflict(msg),
        }
    }
}
