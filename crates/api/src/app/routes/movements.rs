use std::sync::Arc;

use axum::{
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use stockledger_core::{MovementId, ProductId};
use stockledger_inventory::{MovementView, StockMovement};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_movements).post(create_movement))
        .route("/product/:product_id", get(list_product_movements))
        .route("/:id", get(get_movement).delete(delete_movement))
}

pub async fn list_movements(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.query().list_all().await {
        Ok(views) => (StatusCode::OK, Json(views)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_product_movements(
    Extension(services): Extension<Arc<AppServices>>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&product_id) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.query().list_by_product(product_id).await {
        Ok(views) => (StatusCode::OK, Json(views)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let movement_id: MovementId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.query().get_movement(movement_id).await {
        Ok(Some(view)) => (StatusCode::OK, Json(view)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("movement {movement_id}")),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn create_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    body: Result<Json<dto::CreateMovementRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_argument", rejection.body_text());
        }
    };

    let new_movement = match body.into_new_movement(actor.actor_id()) {
        Ok(m) => m,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    let movement = match services.create_movement(new_movement).await {
        Ok(m) => m,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    // The movement is committed from here on: a failed re-read must not turn
    // into an error the client would retry.
    let view = match services.query().get_movement(movement.id).await {
        Ok(Some(view)) => view,
        Ok(None) => unenriched(&movement),
        Err(e) => {
            tracing::warn!(
                movement_id = %movement.id,
                error = %e,
                "movement committed but enriched read failed"
            );
            unenriched(&movement)
        }
    };

    (
        StatusCode::CREATED,
        Json(dto::MovementResponse {
            message: dto::success_message(movement.kind),
            movement: view,
        }),
    )
        .into_response()
}

fn unenriched(movement: &StockMovement) -> MovementView {
    MovementView {
        movement: movement.clone(),
        product_name: None,
        actor_name: None,
    }
}

pub async fn delete_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let movement_id: MovementId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.delete_movement(movement_id).await {
        Ok(deleted) => {
            tracing::info!(
                movement_id = %deleted.id,
                deleted_by = %actor.actor_id(),
                "movement deleted via api"
            );
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "message": "movement deleted",
                    "id": deleted.id.to_string(),
                })),
            )
                .into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}
