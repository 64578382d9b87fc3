//! Postgres ledger integration tests.
//!
//! These need a live database: `DATABASE_URL=postgres://... cargo test -- --ignored`.
//! Each test works on its own freshly inserted product and user, so they can
//! share one database and run in parallel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use stockledger_core::{MovementId, ProductId, UserId};
use stockledger_infra::{
    LedgerError, MovementLedger, MovementQuery, PostgresLedger, PostgresLedgerOptions, RetryPolicy,
    with_retry,
};
use stockledger_inventory::{MovementKind, NewMovement};

async fn ledger() -> PostgresLedger {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres tests");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&url)
        .await
        .expect("connect to postgres");
    let ledger = PostgresLedger::with_options(
        pool,
        PostgresLedgerOptions {
            lock_timeout: Some(Duration::from_secs(10)),
        },
    );
    ledger.migrate().await.expect("apply migration");
    ledger
}

async fn seed(ledger: &PostgresLedger, quantity_on_hand: i64) -> (ProductId, UserId) {
    let product_id = ProductId::new();
    let actor = UserId::new();

    sqlx::query("INSERT INTO users (id, name) VALUES ($1, $2)")
        .bind(*actor.as_uuid())
        .bind("Tomasz")
        .execute(ledger.pool())
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO products (id, name, price, quantity_on_hand, min_quantity_level) \
         VALUES ($1, $2, $3, 0, 5)",
    )
    .bind(*product_id.as_uuid())
    .bind("Shrink wrap roll")
    .bind(Decimal::new(1_999, 2))
    .execute(ledger.pool())
    .await
    .unwrap();

    if quantity_on_hand > 0 {
        ledger
            .create_movement(NewMovement::receipt(product_id, actor, quantity_on_hand).unwrap())
            .await
            .unwrap();
    }
    (product_id, actor)
}

async fn on_hand(ledger: &PostgresLedger, product_id: ProductId) -> i64 {
    ledger
        .product_stock(product_id)
        .await
        .unwrap()
        .unwrap()
        .quantity_on_hand
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn receipt_issue_and_delete_scenario() {
    let ledger = ledger().await;
    let (product_id, actor) = seed(&ledger, 10).await;

    let receipt = ledger
        .create_movement(
            NewMovement::new(
                product_id,
                actor,
                MovementKind::Receipt,
                5,
                Some(Decimal::new(1_850, 2)),
                Some("  dock 4 ".to_string()),
            )
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(receipt.note.as_deref(), Some("dock 4"));
    assert_eq!(on_hand(&ledger, product_id).await, 15);

    let err = ledger
        .create_movement(NewMovement::issue(product_id, actor, 20).unwrap())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::InsufficientStock {
            product_id,
            on_hand: 15,
            requested: 20
        }
    );
    assert_eq!(on_hand(&ledger, product_id).await, 15);

    let issue = ledger
        .create_movement(NewMovement::issue(product_id, actor, 15).unwrap())
        .await
        .unwrap();
    assert_eq!(on_hand(&ledger, product_id).await, 0);

    let deleted = ledger.delete_movement(issue.id).await.unwrap();
    assert_eq!(deleted.id, issue.id);
    assert_eq!(on_hand(&ledger, product_id).await, 15);

    let history = ledger.list_by_product(product_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].movement.id, receipt.id);
    assert_eq!(history[0].product_name.as_deref(), Some("Shrink wrap roll"));
    assert_eq!(history[0].actor_name.as_deref(), Some("Tomasz"));

    let reconciliation = ledger.reconcile(product_id).await.unwrap();
    assert!(reconciliation.is_consistent());
    assert_eq!(reconciliation.movement_count, 2);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn rejected_issue_writes_nothing() {
    let ledger = ledger().await;
    let (product_id, actor) = seed(&ledger, 3).await;

    let result = ledger
        .create_movement(NewMovement::issue(product_id, actor, 4).unwrap())
        .await;
    assert!(matches!(result, Err(LedgerError::InsufficientStock { .. })));

    assert_eq!(ledger.list_by_product(product_id).await.unwrap().len(), 1);
    assert_eq!(on_hand(&ledger, product_id).await, 3);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn unknown_references_are_not_found() {
    let ledger = ledger().await;
    let (product_id, actor) = seed(&ledger, 0).await;

    let missing_product = ledger
        .create_movement(NewMovement::receipt(ProductId::new(), actor, 1).unwrap())
        .await;
    assert!(matches!(missing_product, Err(LedgerError::NotFound(_))));

    let missing_actor = ledger
        .create_movement(NewMovement::receipt(product_id, UserId::new(), 1).unwrap())
        .await;
    assert!(matches!(missing_actor, Err(LedgerError::NotFound(_))));
    assert_eq!(on_hand(&ledger, product_id).await, 0);

    let missing_movement = ledger.delete_movement(MovementId::new()).await;
    assert!(matches!(missing_movement, Err(LedgerError::NotFound(_))));
    assert!(ledger.get_movement(MovementId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn consumed_receipt_cannot_be_deleted() {
    let ledger = ledger().await;
    let (product_id, actor) = seed(&ledger, 0).await;

    let receipt = ledger
        .create_movement(NewMovement::receipt(product_id, actor, 8).unwrap())
        .await
        .unwrap();
    ledger
        .create_movement(NewMovement::issue(product_id, actor, 6).unwrap())
        .await
        .unwrap();

    let err = ledger.delete_movement(receipt.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientStock { on_hand: 2, requested: 8, .. }));
    assert!(ledger.get_movement(receipt.id).await.unwrap().is_some());
    assert_eq!(on_hand(&ledger, product_id).await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_issues_are_serialized_per_product() {
    let ledger = Arc::new(ledger().await);
    let (product_id, actor) = seed(&ledger, 7).await;
    let policy = RetryPolicy::fixed(5, Duration::from_millis(10));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            with_retry(&policy, "issue", || {
                let ledger = Arc::clone(&ledger);
                async move {
                    ledger
                        .create_movement(NewMovement::issue(product_id, actor, 1).unwrap())
                        .await
                }
            })
            .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(LedgerError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(accepted, 7);
    assert_eq!(on_hand(&ledger, product_id).await, 0);
    assert!(ledger.reconcile(product_id).await.unwrap().is_consistent());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn returned_record_matches_the_stored_row() {
    let ledger = ledger().await;
    let (product_id, actor) = seed(&ledger, 0).await;

    let created = ledger
        .create_movement(
            NewMovement::new(
                product_id,
                actor,
                MovementKind::Receipt,
                3,
                Some(Decimal::new(1_999, 2)),
                Some("bay 2".to_string()),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let stored = ledger.get_movement(created.id).await.unwrap().unwrap();
    assert_eq!(stored.movement, created);
    assert_eq!(stored.movement.unit_price.map(|p| p.get()), Some(Decimal::new(1_999, 2)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires DATABASE_URL"]
async fn created_at_is_taken_once_the_product_lock_is_held() {
    let ledger = Arc::new(ledger().await);
    let (product_id, actor) = seed(&ledger, 0).await;

    let mut holder = ledger.pool().begin().await.unwrap();
    sqlx::query("SELECT id FROM products WHERE id = $1 FOR UPDATE")
        .bind(*product_id.as_uuid())
        .execute(&mut *holder)
        .await
        .unwrap();

    let waiting = {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            ledger
                .create_movement(NewMovement::receipt(product_id, actor, 1).unwrap())
                .await
        })
    };

    // Let the writer open its transaction and queue on the row lock.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let released_at: DateTime<Utc> = sqlx::query_scalar("SELECT clock_timestamp()")
        .fetch_one(&mut *holder)
        .await
        .unwrap();
    holder.commit().await.unwrap();

    let movement = waiting.await.unwrap().unwrap();
    assert!(
        movement.created_at >= released_at,
        "created_at {} predates lock release {}",
        movement.created_at,
        released_at
    );
}
