use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{ProductId, UserId};
use stockledger_infra::LedgerError;
use stockledger_inventory::{MovementKind, MovementView, NewMovement, ProductStock, Reconciliation};

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /stock-movements`.
///
/// Every field is optional on the wire so a missing one is reported as an
/// `invalid_argument` rather than a deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct CreateMovementRequest {
    pub product_id: Option<String>,
    pub kind: Option<String>,
    pub quantity: Option<i64>,
    pub unit_price: Option<Decimal>,
    pub note: Option<String>,
}

impl CreateMovementRequest {
    pub fn into_new_movement(self, actor_id: UserId) -> Result<NewMovement, LedgerError> {
        let product_id: ProductId = self
            .product_id
            .ok_or_else(|| LedgerError::InvalidArgument("product_id is required".into()))?
            .trim()
            .parse()
            .map_err(LedgerError::from)?;

        let kind: MovementKind = self
            .kind
            .ok_or_else(|| LedgerError::InvalidArgument("kind is required".into()))?
            .parse()
            .map_err(LedgerError::from)?;

        let quantity = self
            .quantity
            .ok_or_else(|| LedgerError::InvalidArgument("quantity is required".into()))?;

        Ok(NewMovement::new(
            product_id,
            actor_id,
            kind,
            quantity,
            self.unit_price,
            self.note,
        )?)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct MovementResponse {
    pub message: &'static str,
    pub movement: MovementView,
}

pub fn success_message(kind: MovementKind) -> &'static str {
    match kind {
        MovementKind::Receipt => "stock received",
        MovementKind::Issue => "stock issued",
    }
}

#[derive(Debug, Serialize)]
pub struct ProductStockResponse {
    #[serde(flatten)]
    pub product: ProductStock,
    pub low_stock: bool,
}

impl From<ProductStock> for ProductStockResponse {
    fn from(product: ProductStock) -> Self {
        Self {
            low_stock: product.is_low_stock(),
            product,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReconciliationResponse {
    #[serde(flatten)]
    pub reconciliation: Reconciliation,
    pub consistent: bool,
    pub drift: i64,
}

impl From<Reconciliation> for ReconciliationResponse {
    fn from(reconciliation: Reconciliation) -> Self {
        Self {
            consistent: reconciliation.is_consistent(),
            drift: reconciliation.drift(),
            reconciliation,
        }
    }
}
