//! Postgres-backed stock ledger.
//!
//! Every write runs in one transaction that takes a row lock on the product
//! (`SELECT ... FOR UPDATE`) before the guard reads quantity-on-hand, so two
//! concurrent issues against the same product are serialized by the database
//! rather than both passing the check against a stale snapshot. Deletes lock the
//! movement row first, then the product row; creates only lock the product row.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `LedgerError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError | Scenario |
//! |------------|----------------------|-------------|----------|
//! | Database (serialization failure) | `40001` | `ConcurrencyConflict` | Isolation-level retry required |
//! | Database (deadlock detected) | `40P01` | `ConcurrencyConflict` | Lock cycle broken by the server |
//! | Database (lock not available) | `55P03` | `ConcurrencyConflict` | `lock_timeout` expired |
//! | Database (foreign key violation) | `23503` | `NotFound` | Unknown actor (or product) on insert |
//! | Database (check constraint violation) | `23514` | `StorageFailure` | Schema backstop tripped; the guard should have refused first |
//! | Database (other) | Any other | `StorageFailure` | |
//! | PoolTimedOut / PoolClosed / Io | N/A | `ConcurrencyConflict` | Transient; no partial effect was committed |
//! | Other | N/A | `StorageFailure` | |
//!
//! ## Thread Safety
//!
//! `PostgresLedger` is `Send + Sync` and can be shared across request handlers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use stockledger_core::{MovementId, ProductId, UserId};
use stockledger_inventory::{
    MovementKind, MovementView, NewMovement, ProductStock, Quantity, Reconciliation,
    StockMovement, UnitPrice, guard,
};

use super::{LedgerError, MovementLedger, MovementQuery, log_committed};

const MIGRATION: &str = include_str!("../../migrations/0001_stock_ledger.sql");

const VIEW_SELECT: &str = r#"
    SELECT
        sm.id,
        sm.product_id,
        sm.actor_id,
        sm.kind,
        sm.quantity,
        sm.unit_price,
        sm.note,
        sm.created_at,
        p.name AS product_name,
        u.name AS actor_name
    FROM stock_movements sm
    LEFT JOIN products p ON sm.product_id = p.id
    LEFT JOIN users u ON sm.actor_id = u.id
"#;

/// Tunables for the Postgres ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostgresLedgerOptions {
    /// Applied with `SET LOCAL lock_timeout` in every write transaction.
    /// `None` waits for row locks indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl Default for PostgresLedgerOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Postgres-backed stock movement ledger.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: Arc<PgPool>,
    options: PostgresLedgerOptions,
}

impl PostgresLedger {
    /// Create a new PostgresLedger with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self::with_options(pool, PostgresLedgerOptions::default())
    }

    pub fn with_options(pool: PgPool, options: PostgresLedgerOptions) -> Self {
        Self {
            pool: Arc::new(pool),
            options,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the ledger schema (idempotent).
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Start a write transaction with the configured lock timeout.
    async fn begin(&self) -> Result<Transaction<'static, Postgres>, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Some(timeout) = self.options.lock_timeout {
            // SET does not accept bind parameters; the value is a plain integer.
            let stmt = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis());
            sqlx::query(&stmt)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        }
        Ok(tx)
    }

    /// Record a movement and update the product inside one transaction.
    #[instrument(
        skip(self, movement),
        fields(
            product_id = %movement.product_id,
            actor_id = %movement.actor_id,
            kind = %movement.kind,
            quantity = movement.quantity.get(),
            movement_id = tracing::field::Empty
        ),
        err
    )]
    pub async fn create(&self, movement: NewMovement) -> Result<StockMovement, LedgerError> {
        let mut tx = self.begin().await?;

        let mut product = lock_product(&mut tx, movement.product_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("product {}", movement.product_id)))?;

        let next = match guard::apply(
            product.id,
            product.quantity_on_hand,
            movement.kind,
            movement.quantity,
        ) {
            Ok(next) => next,
            Err(e) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                tracing::warn!(error = %e, "stock movement rejected");
                return Err(e.into());
            }
        };

        let id = MovementId::new();
        Span::current().record("movement_id", tracing::field::display(id));

        let row = sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id,
                product_id,
                actor_id,
                kind,
                quantity,
                unit_price,
                note,
                created_at
            )
            -- Taken under the product lock so created_at follows per-product commit order.
            VALUES ($1, $2, $3, $4, $5, $6, $7, clock_timestamp())
            RETURNING created_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(movement.product_id.as_uuid())
        .bind(movement.actor_id.as_uuid())
        .bind(movement.kind.as_str())
        .bind(movement.quantity.get())
        .bind(movement.unit_price.map(|p| p.get()))
        .bind(movement.note.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                LedgerError::NotFound(format!("user {}", movement.actor_id))
            } else {
                map_sqlx_error("insert_movement", e)
            }
        })?;

        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| LedgerError::StorageFailure(format!("failed to read created_at: {e}")))?;

        store_quantity(&mut tx, product.id, next).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        product.quantity_on_hand = next;
        let committed = movement.into_movement(id, created_at);
        log_committed("create", &committed, &product);
        Ok(committed)
    }

    /// Reverse a movement's effect and delete it inside one transaction.
    #[instrument(
        skip(self),
        fields(movement_id = %movement_id, product_id = tracing::field::Empty),
        err
    )]
    pub async fn delete(&self, movement_id: MovementId) -> Result<StockMovement, LedgerError> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT
                id,
                product_id,
                actor_id,
                kind,
                quantity,
                unit_price,
                note,
                created_at
            FROM stock_movements
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(movement_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_movement", e))?;

        let movement = match row {
            Some(row) => MovementRow::from_row(&row)?.into_movement()?,
            None => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(LedgerError::NotFound(format!("movement {movement_id}")));
            }
        };

        Span::current().record("product_id", tracing::field::display(movement.product_id));

        let mut product = lock_product(&mut tx, movement.product_id)
            .await?
            .ok_or_else(|| {
                LedgerError::StorageFailure(format!(
                    "movement {movement_id} references missing product {}",
                    movement.product_id
                ))
            })?;

        let next = match guard::reverse(
            product.id,
            product.quantity_on_hand,
            movement.kind,
            movement.quantity,
        ) {
            Ok(next) => next,
            Err(e) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                tracing::warn!(error = %e, "stock movement deletion rejected");
                return Err(e.into());
            }
        };

        sqlx::query("DELETE FROM stock_movements WHERE id = $1")
            .bind(movement_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_movement", e))?;

        store_quantity(&mut tx, product.id, next).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        product.quantity_on_hand = next;
        log_committed("delete", &movement, &product);
        Ok(movement)
    }

    async fn fetch_views(
        &self,
        operation: &'static str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<MovementView>, LedgerError> {
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            views.push(MovementRow::from_row(&row)?.into_view()?);
        }
        Span::current().record("row_count", views.len());
        Ok(views)
    }
}

#[async_trait]
impl MovementLedger for PostgresLedger {
    async fn create_movement(&self, movement: NewMovement) -> Result<StockMovement, LedgerError> {
        self.create(movement).await
    }

    async fn delete_movement(&self, movement_id: MovementId) -> Result<StockMovement, LedgerError> {
        self.delete(movement_id).await
    }
}

#[async_trait]
impl MovementQuery for PostgresLedger {
    #[instrument(skip(self), fields(movement_id = %movement_id), err)]
    async fn get_movement(&self, movement_id: MovementId) -> Result<Option<MovementView>, LedgerError> {
        let sql = format!("{VIEW_SELECT} WHERE sm.id = $1");
        let mut views = self
            .fetch_views("get_movement", sqlx::query(&sql).bind(*movement_id.as_uuid()))
            .await?;
        Ok(views.pop())
    }

    #[instrument(skip(self), fields(product_id = %product_id, row_count = tracing::field::Empty), err)]
    async fn list_by_product(&self, product_id: ProductId) -> Result<Vec<MovementView>, LedgerError> {
        let sql = format!("{VIEW_SELECT} WHERE sm.product_id = $1 ORDER BY sm.created_at DESC, sm.id DESC");
        self.fetch_views("list_by_product", sqlx::query(&sql).bind(*product_id.as_uuid()))
            .await
    }

    #[instrument(skip(self), fields(row_count = tracing::field::Empty), err)]
    async fn list_all(&self) -> Result<Vec<MovementView>, LedgerError> {
        let sql = format!("{VIEW_SELECT} ORDER BY sm.created_at DESC, sm.id DESC");
        self.fetch_views("list_all", sqlx::query(&sql)).await
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn product_stock(&self, product_id: ProductId) -> Result<Option<ProductStock>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, price, quantity_on_hand, min_quantity_level
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("product_stock", e))?;

        row.map(|r| product_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn reconcile(&self, product_id: ProductId) -> Result<Reconciliation, LedgerError> {
        // One statement, one snapshot: quantity and history are read consistently.
        let row = sqlx::query(
            r#"
            SELECT
                p.quantity_on_hand,
                COALESCE(SUM(CASE WHEN sm.kind = 'in' THEN sm.quantity ELSE -sm.quantity END), 0)::BIGINT
                    AS movement_sum,
                COUNT(sm.id) AS movement_count
            FROM products p
            LEFT JOIN stock_movements sm ON sm.product_id = p.id
            WHERE p.id = $1
            GROUP BY p.id, p.quantity_on_hand
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reconcile", e))?
        .ok_or_else(|| LedgerError::NotFound(format!("product {product_id}")))?;

        let quantity_on_hand: i64 = get(&row, "quantity_on_hand")?;
        let movement_sum: i64 = get(&row, "movement_sum")?;
        let movement_count: i64 = get(&row, "movement_count")?;

        Ok(Reconciliation {
            product_id,
            quantity_on_hand,
            movement_sum,
            movement_count: movement_count as u64,
        })
    }
}

/// Lock the product row for the rest of the transaction and read it.
async fn lock_product(
    tx: &mut Transaction<'_, Postgres>,
    product_id: ProductId,
) -> Result<Option<ProductStock>, LedgerError> {
    let row = sqlx::query(
        r#"
        SELECT id, name, price, quantity_on_hand, min_quantity_level
        FROM products
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(product_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_product", e))?;

    row.map(|r| product_from_row(&r)).transpose()
}

async fn store_quantity(
    tx: &mut Transaction<'_, Postgres>,
    product_id: ProductId,
    quantity_on_hand: i64,
) -> Result<(), LedgerError> {
    sqlx::query("UPDATE products SET quantity_on_hand = $2 WHERE id = $1")
        .bind(product_id.as_uuid())
        .bind(quantity_on_hand)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_quantity", e))?;
    Ok(())
}

fn get<'r, T>(row: &'r sqlx::postgres::PgRow, column: &str) -> Result<T, LedgerError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| LedgerError::StorageFailure(format!("failed to read {column}: {e}")))
}

fn product_from_row(row: &sqlx::postgres::PgRow) -> Result<ProductStock, LedgerError> {
    Ok(ProductStock {
        id: ProductId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        price: get(row, "price")?,
        quantity_on_hand: get(row, "quantity_on_hand")?,
        min_quantity_level: get(row, "min_quantity_level")?,
    })
}

/// Map SQLx errors to LedgerError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                // serialization_failure / deadlock_detected / lock_not_available
                Some("40001") | Some("40P01") | Some("55P03") => LedgerError::ConcurrencyConflict(msg),
                // foreign_key_violation
                Some("23503") => LedgerError::NotFound(msg),
                _ => LedgerError::StorageFailure(msg),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            LedgerError::ConcurrencyConflict(format!("connection unavailable in {}: {}", operation, err))
        }
        _ => LedgerError::StorageFailure(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23503");
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct MovementRow {
    id: uuid::Uuid,
    product_id: uuid::Uuid,
    actor_id: uuid::Uuid,
    kind: String,
    quantity: i64,
    unit_price: Option<Decimal>,
    note: Option<String>,
    created_at: DateTime<Utc>,
    product_name: Option<String>,
    actor_name: Option<String>,
}

impl MovementRow {
    /// Reads the joined name columns only when the query selected them.
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, LedgerError> {
        let has_names = row.try_get::<Option<String>, _>("product_name").is_ok();
        Ok(MovementRow {
            id: get(row, "id")?,
            product_id: get(row, "product_id")?,
            actor_id: get(row, "actor_id")?,
            kind: get(row, "kind")?,
            quantity: get(row, "quantity")?,
            unit_price: get(row, "unit_price")?,
            note: get(row, "note")?,
            created_at: get(row, "created_at")?,
            product_name: if has_names { get(row, "product_name")? } else { None },
            actor_name: if has_names { get(row, "actor_name")? } else { None },
        })
    }

    fn into_movement(self) -> Result<StockMovement, LedgerError> {
        self.split().map(|(movement, _, _)| movement)
    }

    fn into_view(self) -> Result<MovementView, LedgerError> {
        let (movement, product_name, actor_name) = self.split()?;
        Ok(MovementView {
            movement,
            product_name,
            actor_name,
        })
    }

    fn split(self) -> Result<(StockMovement, Option<String>, Option<String>), LedgerError> {
        let corrupt = |e: stockledger_core::DomainError| {
            LedgerError::StorageFailure(format!("corrupt movement row {}: {e}", self.id))
        };

        let kind: MovementKind = self.kind.parse().map_err(corrupt)?;
        let quantity = Quantity::new(self.quantity).map_err(corrupt)?;
        let unit_price = self.unit_price.map(UnitPrice::new).transpose().map_err(corrupt)?;

        let movement = StockMovement {
            id: MovementId::from_uuid(self.id),
            product_id: ProductId::from_uuid(self.product_id),
            actor_id: UserId::from_uuid(self.actor_id),
            kind,
            quantity,
            unit_price,
            note: self.note,
            created_at: self.created_at,
        };
        Ok((movement, self.product_name, self.actor_name))
    }
}
