//! Ledger wiring: picks the backend from config and applies the retry policy.

use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;

use stockledger_core::{MovementId, UserId};
use stockledger_infra::{
    InMemoryLedger, LedgerError, MovementLedger, MovementQuery, PostgresLedger, RetryPolicy,
    with_retry,
};
use stockledger_inventory::{NewMovement, StockMovement};

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppServices {
    ledger: Arc<dyn MovementLedger>,
    query: Arc<dyn MovementQuery>,
    retry: RetryPolicy,
}

impl AppServices {
    pub fn new(ledger: Arc<dyn MovementLedger>, query: Arc<dyn MovementQuery>, retry: RetryPolicy) -> Self {
        Self { ledger, query, retry }
    }

    pub fn in_memory(ledger: Arc<InMemoryLedger>, retry: RetryPolicy) -> Self {
        Self {
            ledger: ledger.clone(),
            query: ledger,
            retry,
        }
    }

    pub fn postgres(ledger: Arc<PostgresLedger>, retry: RetryPolicy) -> Self {
        Self {
            ledger: ledger.clone(),
            query: ledger,
            retry,
        }
    }

    pub fn query(&self) -> &dyn MovementQuery {
        &*self.query
    }

    /// Record a movement, retrying transient conflicts per policy.
    pub async fn create_movement(&self, movement: NewMovement) -> Result<StockMovement, LedgerError> {
        with_retry(&self.retry, "create_movement", || {
            self.ledger.create_movement(movement.clone())
        })
        .await
    }

    /// Delete a movement, retrying transient conflicts per policy.
    pub async fn delete_movement(&self, movement_id: MovementId) -> Result<StockMovement, LedgerError> {
        with_retry(&self.retry, "delete_movement", || {
            self.ledger.delete_movement(movement_id)
        })
        .await
    }
}

/// Build the ledger backend selected by `DATABASE_URL`.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await?;

            let ledger = PostgresLedger::with_options(pool, config.ledger);
            ledger.migrate().await?;
            tracing::info!("using postgres stock ledger");

            Ok(AppServices::postgres(Arc::new(ledger), config.retry))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stock ledger");
            let ledger = Arc::new(InMemoryLedger::new());
            seed_dev_catalog(&ledger)?;
            Ok(AppServices::in_memory(ledger, config.retry))
        }
    }
}

/// The in-memory ledger has no catalog or accounts service behind it; register a
/// demo user and product so the API is usable locally.
fn seed_dev_catalog(ledger: &InMemoryLedger) -> Result<(), LedgerError> {
    let actor_id = UserId::new();
    ledger.register_user(actor_id, "dev")?;
    let product_id = ledger.add_product("Demo product", Decimal::new(1_000, 2), 5)?;

    tracing::info!(
        actor_id = %actor_id,
        product_id = %product_id,
        "seeded in-memory catalog"
    );
    Ok(())
}
