//! Stock movement ledger boundary.
//!
//! The ledger is the single entry point for recording and reversing stock
//! movements. Every write runs as one atomic unit that:
//!
//! 1. locks the owning product row (pessimistic, per product)
//! 2. asks the quantity guard whether the change keeps stock non-negative
//! 3. inserts (or deletes) the movement row
//! 4. stores the product's new quantity-on-hand
//!
//! so that, after every committed operation, quantity-on-hand equals receipts
//! minus issues over the product's existing movements. Writes against different
//! products never contend.
//!
//! Reads go through [`MovementQuery`] and never take the product lock.

pub mod error;
pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use stockledger_core::{MovementId, ProductId};
use stockledger_inventory::{MovementView, NewMovement, ProductStock, Reconciliation, StockMovement};

pub use error::LedgerError;
pub use in_memory::InMemoryLedger;
pub use postgres::{PostgresLedger, PostgresLedgerOptions};

/// Write side of the ledger.
#[async_trait]
pub trait MovementLedger: Send + Sync {
    /// Record a movement and apply its effect to the product, atomically.
    ///
    /// Fails with `NotFound` if the product or actor does not exist and with
    /// `InsufficientStock` if an issue exceeds the locked quantity-on-hand. On
    /// any failure no movement row exists and quantity-on-hand is unchanged.
    async fn create_movement(&self, movement: NewMovement) -> Result<StockMovement, LedgerError>;

    /// Reverse a movement's effect on its product and delete it, atomically.
    ///
    /// Returns the deleted record. Fails with `NotFound` if the movement does not
    /// exist (including when a concurrent delete got there first) and with
    /// `InsufficientStock` if reversing a receipt would drive stock negative.
    async fn delete_movement(&self, movement_id: MovementId) -> Result<StockMovement, LedgerError>;
}

/// Read side of the ledger.
///
/// Lists are ordered newest first.
#[async_trait]
pub trait MovementQuery: Send + Sync {
    async fn get_movement(&self, movement_id: MovementId) -> Result<Option<MovementView>, LedgerError>;

    async fn list_by_product(&self, product_id: ProductId) -> Result<Vec<MovementView>, LedgerError>;

    async fn list_all(&self) -> Result<Vec<MovementView>, LedgerError>;

    async fn product_stock(&self, product_id: ProductId) -> Result<Option<ProductStock>, LedgerError>;

    /// Compare stored quantity-on-hand with the signed movement sum.
    async fn reconcile(&self, product_id: ProductId) -> Result<Reconciliation, LedgerError>;
}

#[async_trait]
impl<S> MovementLedger for Arc<S>
where
    S: MovementLedger + ?Sized,
{
    async fn create_movement(&self, movement: NewMovement) -> Result<StockMovement, LedgerError> {
        (**self).create_movement(movement).await
    }

    async fn delete_movement(&self, movement_id: MovementId) -> Result<StockMovement, LedgerError> {
        (**self).delete_movement(movement_id).await
    }
}

#[async_trait]
impl<S> MovementQuery for Arc<S>
where
    S: MovementQuery + ?Sized,
{
    async fn get_movement(&self, movement_id: MovementId) -> Result<Option<MovementView>, LedgerError> {
        (**self).get_movement(movement_id).await
    }

    async fn list_by_product(&self, product_id: ProductId) -> Result<Vec<MovementView>, LedgerError> {
        (**self).list_by_product(product_id).await
    }

    async fn list_all(&self) -> Result<Vec<MovementView>, LedgerError> {
        (**self).list_all().await
    }

    async fn product_stock(&self, product_id: ProductId) -> Result<Option<ProductStock>, LedgerError> {
        (**self).product_stock(product_id).await
    }

    async fn reconcile(&self, product_id: ProductId) -> Result<Reconciliation, LedgerError> {
        (**self).reconcile(product_id).await
    }
}

/// Newest first; ties on `created_at` fall back to the (time-ordered) id.
pub(crate) fn sort_newest_first(views: &mut [MovementView]) {
    views.sort_by(|a, b| {
        b.movement
            .created_at
            .cmp(&a.movement.created_at)
            .then_with(|| b.movement.id.cmp(&a.movement.id))
    });
}

/// Emit the post-commit log lines shared by every backend.
pub(crate) fn log_committed(action: &'static str, movement: &StockMovement, product: &ProductStock) {
    tracing::info!(
        action,
        movement_id = %movement.id,
        product_id = %movement.product_id,
        actor_id = %movement.actor_id,
        kind = %movement.kind,
        quantity = movement.quantity.get(),
        quantity_on_hand = product.quantity_on_hand,
        "stock movement committed"
    );

    if product.is_low_stock() {
        tracing::warn!(
            product_id = %product.id,
            product_name = %product.name,
            quantity_on_hand = product.quantity_on_hand,
            min_quantity_level = product.min_quantity_level,
            "product at or below minimum stock level"
        );
    }
}
