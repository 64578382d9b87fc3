use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockledger_infra::LedgerError;

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    let status = match &err {
        LedgerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InsufficientStock { .. } => StatusCode::CONFLICT,
        LedgerError::ConcurrencyConflict(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(error = %err, "ledger operation failed");
    }

    json_error(status, err.code(), err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path id, answering 400 with the id's own error on failure.
pub fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| json_error(StatusCode::BAD_REQUEST, "invalid_argument", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use stockledger_core::{MovementId, ProductId};

    #[test]
    fn maps_every_category_to_a_status() {
        let cases = [
            (LedgerError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                LedgerError::InsufficientStock {
                    product_id: ProductId::new(),
                    on_hand: 1,
                    requested: 2,
                },
                StatusCode::CONFLICT,
            ),
            (LedgerError::ConcurrencyConflict("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (LedgerError::StorageFailure("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ledger_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        let res = parse_id::<MovementId>("nope").unwrap_err();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(parse_id::<MovementId>(&MovementId::new().to_string()).is_ok());
    }
}
