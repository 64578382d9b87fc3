use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use stockledger_core::ProductId;

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/:id/stock", get(get_stock))
        .route("/:id/reconciliation", get(get_reconciliation))
}

pub async fn get_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.query().product_stock(product_id).await {
        Ok(Some(product)) => (StatusCode::OK, Json(dto::ProductStockResponse::from(product))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("product {product_id}")),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_reconciliation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.query().reconcile(product_id).await {
        Ok(reconciliation) => {
            if !reconciliation.is_consistent() {
                tracing::warn!(
                    product_id = %product_id,
                    drift = reconciliation.drift(),
                    "stored quantity disagrees with movement history"
                );
            }
            (StatusCode::OK, Json(dto::ReconciliationResponse::from(reconciliation))).into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}
