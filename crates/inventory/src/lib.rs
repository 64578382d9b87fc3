//! Inventory domain module: stock movements and the quantity-on-hand guard.
//!
//! This crate contains business rules for the stock ledger, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod guard;
pub mod movement;
pub mod product;

pub use movement::{
    MovementKind, MovementView, NewMovement, Quantity, StockMovement, UnitPrice,
};
pub use product::{ProductStock, Reconciliation};
