//! Domain error model.

use thiserror::Error;

use crate::id::ProductId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Storage and transport concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. non-positive quantity, unknown kind).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced product, movement or user does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Applying a quantity change would drive quantity-on-hand below zero.
    #[error("insufficient stock for product {product_id}: on hand {on_hand}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        on_hand: i64,
        requested: i64,
    },

    /// A conflict occurred (e.g. a concurrent writer won the race).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn insufficient_stock(product_id: ProductId, on_hand: i64, requested: i64) -> Self {
        Self::InsufficientStock {
            product_id,
            on_hand,
            requested,
        }
    }
}
