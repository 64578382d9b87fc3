use axum::Router;

pub mod movements;
pub mod products;
pub mod system;

/// Router for all endpoints that act on behalf of a user.
pub fn router() -> Router {
    Router::new()
        .nest("/stock-movements", movements::router())
        .nest("/products", products::router())
}
