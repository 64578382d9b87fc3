use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::ProductId;

/// Stock-relevant snapshot of a product row.
///
/// Products are owned by the catalog; the ledger only ever changes
/// `quantity_on_hand`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStock {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub quantity_on_hand: i64,
    pub min_quantity_level: i64,
}

impl ProductStock {
    /// True when stock has fallen to (or below) the reorder threshold.
    pub fn is_low_stock(&self) -> bool {
        self.quantity_on_hand <= self.min_quantity_level
    }
}

/// Result of comparing stored quantity-on-hand with the movement history.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub product_id: ProductId,
    pub quantity_on_hand: i64,
    /// Receipts minus issues over every existing movement of the product.
    pub movement_sum: i64,
    pub movement_count: u64,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.quantity_on_hand == self.movement_sum
    }

    /// Stored quantity minus the derived one (0 when consistent).
    pub fn drift(&self) -> i64 {
        self.quantity_on_hand - self.movement_sum
    }
}
