use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, MovementId, ProductId, UserId};

/// Direction of a stock movement.
///
/// Serialized as `"in"` / `"out"`, which is also the value stored in the
/// `stock_movements.kind` column.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    /// Goods received; increases quantity-on-hand.
    #[serde(rename = "in")]
    Receipt,
    /// Goods dispatched or consumed; decreases quantity-on-hand.
    #[serde(rename = "out")]
    Issue,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Receipt => "in",
            MovementKind::Issue => "out",
        }
    }

    /// The movement that undoes this one.
    pub fn inverse(self) -> Self {
        match self {
            MovementKind::Receipt => MovementKind::Issue,
            MovementKind::Issue => MovementKind::Receipt,
        }
    }

    /// Signed effect of `quantity` units of this kind on quantity-on-hand.
    pub fn signed(self, quantity: Quantity) -> i64 {
        match self {
            MovementKind::Receipt => quantity.get(),
            MovementKind::Issue => -quantity.get(),
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" | "receipt" => Ok(MovementKind::Receipt),
            "out" | "issue" => Ok(MovementKind::Issue),
            other => Err(DomainError::validation(format!(
                "kind must be 'in' or 'out' (got '{other}')"
            ))),
        }
    }
}

/// A strictly positive number of units.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(i64);

impl Quantity {
    pub fn new(value: i64) -> DomainResult<Self> {
        if value < 1 {
            return Err(DomainError::validation(format!(
                "quantity must be greater than 0 (got {value})"
            )));
        }
        Ok(Self(value))
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Quantity {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Quantity::new(value)
    }
}

impl From<Quantity> for i64 {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

/// Informational unit price; never negative, never used for valuation.
///
/// Bounded to what the `NUMERIC(12, 2)` column stores exactly: at most two
/// decimal places and below 10^10.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct UnitPrice(Decimal);

impl UnitPrice {
    pub const MAX_SCALE: u32 = 2;
    /// Exclusive upper bound (10^10).
    pub const LIMIT: Decimal = Decimal::from_parts(1_410_065_408, 2, 0, false, 0);

    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(DomainError::validation(format!(
                "unit price cannot be negative (got {value})"
            )));
        }
        if value.normalize().scale() > Self::MAX_SCALE {
            return Err(DomainError::validation(format!(
                "unit price allows at most {} decimal places (got {value})",
                Self::MAX_SCALE
            )));
        }
        if value >= Self::LIMIT {
            return Err(DomainError::validation(format!(
                "unit price must be below {} (got {value})",
                Self::LIMIT
            )));
        }
        Ok(Self(value))
    }

    pub fn get(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for UnitPrice {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        UnitPrice::new(value)
    }
}

impl From<UnitPrice> for Decimal {
    fn from(value: UnitPrice) -> Self {
        value.0
    }
}

/// A validated request to record a movement.
///
/// Constructing one performs every input check the ledger needs, so a
/// `NewMovement` that reaches storage is already known to be well-formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub product_id: ProductId,
    pub actor_id: UserId,
    pub kind: MovementKind,
    pub quantity: Quantity,
    pub unit_price: Option<UnitPrice>,
    pub note: Option<String>,
}

impl NewMovement {
    pub fn new(
        product_id: ProductId,
        actor_id: UserId,
        kind: MovementKind,
        quantity: i64,
        unit_price: Option<Decimal>,
        note: Option<String>,
    ) -> DomainResult<Self> {
        let quantity = Quantity::new(quantity)?;
        let unit_price = unit_price.map(UnitPrice::new).transpose()?;
        let note = note
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Ok(Self {
            product_id,
            actor_id,
            kind,
            quantity,
            unit_price,
            note,
        })
    }

    pub fn receipt(product_id: ProductId, actor_id: UserId, quantity: i64) -> DomainResult<Self> {
        Self::new(product_id, actor_id, MovementKind::Receipt, quantity, None, None)
    }

    pub fn issue(product_id: ProductId, actor_id: UserId, quantity: i64) -> DomainResult<Self> {
        Self::new(product_id, actor_id, MovementKind::Issue, quantity, None, None)
    }

    /// Persisted form of this intent, once storage has assigned identity and time.
    pub fn into_movement(self, id: MovementId, created_at: DateTime<Utc>) -> StockMovement {
        StockMovement {
            id,
            product_id: self.product_id,
            actor_id: self.actor_id,
            kind: self.kind,
            quantity: self.quantity,
            unit_price: self.unit_price,
            note: self.note,
            created_at,
        }
    }
}

/// A committed movement. Immutable; it can only be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub actor_id: UserId,
    pub kind: MovementKind,
    pub quantity: Quantity,
    pub unit_price: Option<UnitPrice>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn signed_quantity(&self) -> i64 {
        self.kind.signed(self.quantity)
    }
}

/// Read-side view of a movement, enriched with product and actor names.
///
/// Names are `None` when the referenced row no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementView {
    #[serde(flatten)]
    pub movement: StockMovement,
    pub product_name: Option<String>,
    pub actor_name: Option<String>,
}
